//! `braid bounty`: explicit bounty actions on an issue.
//!
//! Every action is signed as a bounty event and folded into the projection
//! the same way a relay-delivered bounty event would be, so a rebuild
//! reproduces it. The event then goes out to the configured relays.

use anyhow::Result;
use braid_core::bounty::{Bounty, BountyBook, BountyError, PaymentError, PaymentGateway, WithdrawLink};
use braid_core::db::project::{ProjectResult, Projector};
use braid_core::db::query;
use braid_core::error::ErrorCode;
use braid_core::event::{EventBuilder, EventKind};
use braid_core::model::{BountyState, RootFamily};
use clap::Args;
use serde::Serialize;
use std::io::Write;
use tracing::info;

use crate::output::{OutputMode, fail, invalid, pretty_kv, render_mode, short};
use crate::project::{Project, now_secs};

#[derive(Args, Debug)]
pub struct BountyArgs {
    /// Issue id, or a unique prefix of one.
    pub issue: String,

    /// Target state: pending (offer), paid, released, cancelled.
    #[arg(value_parser = parse_bounty_state)]
    pub state: BountyState,

    /// Amount in sats. Required when offering a new bounty.
    #[arg(long)]
    pub amount: Option<u64>,

    /// Withdraw link (LNURL) created with the payment provider. Required
    /// when releasing.
    #[arg(long)]
    pub withdraw_link: Option<String>,
}

fn parse_bounty_state(raw: &str) -> Result<BountyState, String> {
    raw.parse().map_err(|e| format!("{e}"))
}

/// Payment collaborator for the command line: the withdraw link is created
/// with the provider outside braid and handed over with `--withdraw-link`.
struct ManualPayment {
    link: Option<String>,
}

impl PaymentGateway for ManualPayment {
    fn create_withdraw_link(&self, amount_sats: u64, memo: &str) -> Result<WithdrawLink, PaymentError> {
        let url = self
            .link
            .clone()
            .ok_or_else(|| PaymentError(format!("{memo}: releasing needs --withdraw-link")))?;
        Ok(WithdrawLink {
            id: url.clone(),
            url,
            amount_sats,
        })
    }

    fn release_funds(&self, link: &WithdrawLink) -> Result<(), PaymentError> {
        info!(link = %link.url, amount = link.amount_sats, "funds released through withdraw link");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct BountyOutput {
    #[serde(flatten)]
    bounty: Bounty,
    published_to: Option<usize>,
}

fn bounty_failure(output: OutputMode, err: &BountyError) -> anyhow::Error {
    let code = match err {
        BountyError::Payment(_) => ErrorCode::PaymentFailed,
        BountyError::NotFound(_) | BountyError::Transition(_) | BountyError::MissingAmount(_) => {
            ErrorCode::InvalidStateTransition
        }
    };
    fail(output, code, err.to_string())
}

/// Execute `braid bounty <issue> <state>`.
///
/// # Errors
///
/// Returns an error if no signer is configured, the issue is unknown, the
/// transition is not allowed, or the payment collaborator fails.
pub fn run_bounty(args: &BountyArgs, project: &Project) -> Result<()> {
    let keys = project.signer()?;
    let conn = project.open_existing_db()?;
    let lock = project.write_lock()?;

    let Some(issue) = query::resolve_item_id(&conn, &args.issue)? else {
        return Err(fail(
            project.output,
            ErrorCode::ItemNotFound,
            format!("issue '{}' not found", args.issue),
        ));
    };
    let family = query::get_item(&conn, &issue, project.status_policy())?.map(|i| i.summary.family);
    if family != Some(RootFamily::Issue) {
        return Err(invalid(
            project.output,
            format!("bounties attach to issues; {} is not one", short(&issue, 12)),
        ));
    }

    let mut book = BountyBook::new();
    let existing = query::get_bounty(&conn, &issue)?;
    // Strictly newer than the stored state, or the signed event would lose.
    let at = existing
        .as_ref()
        .map_or_else(now_secs, |b| now_secs().max(b.updated_at + 1));
    if let Some(bounty) = existing {
        book.restore(bounty);
    }

    if args.state == BountyState::Pending {
        let Some(amount) = args.amount else {
            return Err(invalid(project.output, "offering a bounty needs --amount"));
        };
        if !book.offer(&issue, amount, at) {
            return Err(fail(
                project.output,
                ErrorCode::InvalidStateTransition,
                format!("issue {} already has a bounty", short(&issue, 12)),
            ));
        }
    } else {
        let gateway = ManualPayment {
            link: args.withdraw_link.clone(),
        };
        book.user_action(&issue, args.state, at, &gateway)
            .map_err(|e| bounty_failure(project.output, &e))?;
    }
    let Some(mut bounty) = book.get(&issue).cloned() else {
        anyhow::bail!("bounty for {issue} vanished from the book");
    };

    let mut builder = EventBuilder::new(EventKind::Bounty, "")
        .tag(["e", issue.as_str(), "", "root"])
        .tag(["status", bounty.state.as_str()])
        .created_at(at);
    if let Some(amount) = bounty.amount_sats {
        builder = builder.tag(["amount".to_string(), amount.to_string()]);
    }
    let event = builder.sign(&keys);

    match Projector::new(&conn).ingest_event(&event, None)? {
        ProjectResult::Projected => {}
        other => anyhow::bail!("signed bounty event was not projected: {other:?}"),
    }
    if bounty.withdraw_link.is_some() {
        // The event does not carry the link; keep it on the local record.
        let mut stored = query::get_bounty(&conn, &issue)?.unwrap_or_else(|| bounty.clone());
        stored.withdraw_link.clone_from(&bounty.withdraw_link);
        query::save_bounty(&conn, &stored)?;
        bounty = stored;
    } else if let Some(stored) = query::get_bounty(&conn, &issue)? {
        bounty = stored;
    }
    lock.release();

    let report = project.publish(&event)?;
    let out = BountyOutput {
        bounty,
        published_to: report.map(|r| r.accepted.len()),
    };
    render_mode(
        project.output,
        &out,
        |o, w| {
            writeln!(
                w,
                "bounty {} {} {}",
                o.bounty.issue_id,
                o.bounty.state,
                o.bounty
                    .amount_sats
                    .map_or_else(|| "-".to_string(), |a| a.to_string())
            )
        },
        |o, w| {
            pretty_kv(w, "Issue", short(&o.bounty.issue_id, 12))?;
            pretty_kv(w, "State", o.bounty.state.as_str())?;
            if let Some(amount) = o.bounty.amount_sats {
                pretty_kv(w, "Amount", format!("{amount} sats"))?;
            }
            if let Some(link) = &o.bounty.withdraw_link {
                pretty_kv(w, "Withdraw", &link.url)?;
            }
            match o.published_to {
                Some(n) => pretty_kv(w, "Published", format!("{n} relay(s)")),
                None => pretty_kv(w, "Published", "no relays configured"),
            }
        },
    )
}
