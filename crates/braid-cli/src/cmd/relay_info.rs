//! `braid relay-info`: fetch a relay's self-description document.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use braid_core::error::ErrorCode;
use braid_core::event::EventKind;
use braid_relay::{RelayInfo, fetch_info};
use clap::Args;
use serde::Serialize;

use crate::output::{fail, pretty_kv, pretty_section, render_mode};
use crate::project::{Project, runtime};

/// Protocol features braid relies on, by number.
const WANTED_NIPS: [(u32, &str); 3] = [(1, "basic protocol"), (11, "relay info"), (34, "git")];

#[derive(Args, Debug)]
pub struct RelayInfoArgs {
    /// Relay URL (`wss://...`). Defaults to every configured relay.
    pub url: Option<String>,

    /// Seconds to wait for each relay.
    #[arg(long, default_value = "5")]
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
struct RelayReport {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    info: Option<RelayInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Execute `braid relay-info`.
///
/// # Errors
///
/// Returns an error if there is no relay to ask, or none of them answered.
pub fn run_relay_info(args: &RelayInfoArgs, project: &Project) -> Result<()> {
    let urls = match &args.url {
        Some(url) => vec![url.clone()],
        None => project.config.project.relays.urls.clone(),
    };
    if urls.is_empty() {
        return Err(fail(
            project.output,
            ErrorCode::RelaysUnreachable,
            "no relays configured",
        ));
    }

    let timeout = Duration::from_secs(args.timeout.max(1));
    let rt = runtime()?;
    let reports: Vec<RelayReport> = rt.block_on(async {
        let lookups = urls.iter().map(|url| async move {
            match fetch_info(url, timeout).await {
                Ok(info) => RelayReport {
                    url: url.clone(),
                    info: Some(info),
                    error: None,
                },
                Err(e) => RelayReport {
                    url: url.clone(),
                    info: None,
                    error: Some(e.to_string()),
                },
            }
        });
        futures_util::future::join_all(lookups).await
    });

    let answered = reports.iter().filter(|r| r.info.is_some()).count();
    render_mode(project.output, &reports, render_text, render_pretty)?;
    if answered == 0 {
        return Err(fail(
            project.output,
            ErrorCode::RelaysUnreachable,
            "no relay returned its info document",
        ));
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn render_text(reports: &Vec<RelayReport>, w: &mut dyn Write) -> std::io::Result<()> {
    for report in reports {
        match (&report.info, &report.error) {
            (Some(info), _) => {
                let nips: Vec<String> = info.supported_nips.iter().map(u32::to_string).collect();
                writeln!(
                    w,
                    "{} name={} nips={}",
                    report.url,
                    info.name.as_deref().unwrap_or("-"),
                    nips.join(",")
                )?;
            }
            (None, error) => {
                writeln!(w, "{} error={}", report.url, error.as_deref().unwrap_or("unknown"))?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::ptr_arg)]
fn render_pretty(reports: &Vec<RelayReport>, w: &mut dyn Write) -> std::io::Result<()> {
    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            writeln!(w)?;
        }
        pretty_section(w, &report.url)?;
        let Some(info) = &report.info else {
            pretty_kv(w, "Error", report.error.as_deref().unwrap_or("unknown"))?;
            continue;
        };
        render_info(info, w)?;
    }
    Ok(())
}

fn render_info(info: &RelayInfo, w: &mut dyn Write) -> std::io::Result<()> {
    if let Some(name) = &info.name {
        pretty_kv(w, "Name", name)?;
    }
    if let Some(description) = &info.description {
        pretty_kv(w, "About", description)?;
    }
    if let Some(software) = &info.software {
        let version = info.version.as_deref().unwrap_or("");
        pretty_kv(w, "Software", format!("{software} {version}").trim_end())?;
    }
    if let Some(contact) = &info.contact {
        pretty_kv(w, "Contact", contact)?;
    }
    for (nip, what) in WANTED_NIPS {
        let mark = if info.supports(nip) { "yes" } else { "no" };
        pretty_kv(w, &format!("NIP-{nip:02}"), format!("{mark} ({what})"))?;
    }
    for kind in [EventKind::Issue, EventKind::PullRequest, EventKind::Bounty] {
        if let Some(about) = info.kind_description(kind.as_u32()) {
            pretty_kv(w, &format!("Kind {}", kind.as_u32()), about)?;
        }
    }
    Ok(())
}
