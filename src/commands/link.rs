use crate::commands::CommandReport;
use crate::digest::config;
use crate::digest::links::LinkProcessor;
use crate::digest::paths;
use anyhow::Result;

fn link_processor() -> Result<LinkProcessor> {
    let paths = paths::resolve_paths()?;
    let cfg = config::load_config(&paths)?;
    Ok(LinkProcessor::new(&cfg.links.base_url))
}

pub fn build(server: &str, channel: &str, message: &str) -> Result<CommandReport> {
    let links = link_processor()?;
    let mut report = CommandReport::new("link build");
    let link = links.build_link(server, channel, message);
    match links.parse_link(&link) {
        Ok(_) => report.detail(format!("link={link}")),
        Err(err) => report.issue(err.to_string()),
    }
    Ok(report)
}

pub fn parse(url: &str) -> Result<CommandReport> {
    let links = link_processor()?;
    let mut report = CommandReport::new("link parse");
    match links.parse_link(url.trim()) {
        Ok(parsed) => {
            report.detail(format!("server={}", parsed.server_id));
            report.detail(format!("channel={}", parsed.channel_id));
            report.detail(format!("message={}", parsed.message_id));
        }
        Err(err) => report.issue(format!("{}: {err}", err.code())),
    }
    Ok(report)
}
