use std::sync::Arc;

use chrono::{Duration, Utc};
use clap::Args;
use serde_json::json;

use crate::infra::{
    InMemoryChainStore, InMemoryLinkStore, InMemoryStatusStore, LogBackup, LogNotifier,
    OpenDirectory, ScriptableAuditBridge, ScriptableScanBridge,
};
use shareguard::config::ApprovalSettings;
use shareguard::error::AppError;
use shareguard::workflows::sharelink::approval::{
    ApprovalOrchestrator, AuditDecision, Decision, LinkStore, LinkToken, ReviewerId, ScanVerdict,
    ShareLink, StandardPolicy,
};

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Have the first reviewer veto instead of approving.
    #[arg(long)]
    pub(crate) veto: bool,
    /// Have the content scan return a high-risk verdict.
    #[arg(long)]
    pub(crate) high_risk: bool,
}

type DemoOrchestrator =
    ApprovalOrchestrator<InMemoryChainStore, InMemoryStatusStore, InMemoryLinkStore>;

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let settings = ApprovalSettings::default();
    let links = Arc::new(InMemoryLinkStore::default());
    let scanner = Arc::new(ScriptableScanBridge::default());
    let audit = Arc::new(ScriptableAuditBridge::default());

    let orchestrator: Arc<DemoOrchestrator> = Arc::new(ApprovalOrchestrator::new(
        Arc::new(InMemoryChainStore::default()),
        Arc::new(InMemoryStatusStore::default()),
        links.clone(),
        Arc::new(OpenDirectory),
        scanner.clone(),
        audit.clone(),
        Arc::new(LogNotifier),
        Arc::new(LogBackup),
        Arc::new(StandardPolicy::from_settings(&settings)),
        settings,
    ));

    println!("Share-link approval demo");

    let owner = "owner@corp.cn";
    let chain = orchestrator
        .replace_user_chain(owner, "lead@corp.cn->peer-a@corp.cn|peer-b@corp.cn")
        .map_err(AppError::from)?;
    println!(
        "  chain for {owner}: {}",
        chain.serialize(false, orchestrator.directory())
    );

    let ctime = Utc::now();
    let link = ShareLink {
        token: LinkToken("demo-link".to_string()),
        repo_id: "repo-42".to_string(),
        path: "/finance/q3-forecast.xlsx".to_string(),
        owner: owner.to_string(),
        ctime,
        expire_at: Some(ctime + Duration::days(7)),
        receivers: vec!["partner@example.com".to_string()],
        note: Some("forecast shared for the partner sync".to_string()),
        backup_done: false,
    };
    links.insert(link.clone()).map_err(|err| {
        AppError::Workflow(shareguard::workflows::sharelink::approval::ApprovalError::Store(err))
    })?;

    orchestrator.on_link_created(&link).map_err(AppError::from)?;
    print_status(&orchestrator, &link.token)?;

    if args.high_risk {
        println!("\n  scanner flags high-risk content");
        scanner.resolve(
            &link.token,
            ScanVerdict::BlockHighRisk {
                details: json!({
                    "policy_categories": "financial",
                    "breach_content": "projected revenue table",
                    "total_matches": 12,
                }),
            },
        );
    } else {
        println!("\n  scanner passes the file");
        scanner.resolve(&link.token, ScanVerdict::Pass);
    }
    orchestrator.poll_scan_results().map_err(AppError::from)?;
    print_status(&orchestrator, &link.token)?;

    if args.high_risk {
        return print_final(&orchestrator, &link.token);
    }

    let lead_decision = if args.veto {
        Decision::Veto
    } else {
        Decision::Pass
    };
    println!("\n  lead@corp.cn decides: {}", lead_decision.label());
    orchestrator
        .on_reviewer_decision(
            &link.token,
            &ReviewerId::new("lead@corp.cn"),
            lead_decision,
            Utc::now(),
        )
        .map_err(AppError::from)?;
    print_status(&orchestrator, &link.token)?;

    if !args.veto {
        println!("\n  peer-a@corp.cn approves via the audit mirror");
        let correlation = audit
            .submissions()
            .first()
            .map(|_| "audit-1".to_string())
            .unwrap_or_default();
        audit.record_decision(
            &correlation,
            AuditDecision {
                reviewer: ReviewerId::new("peer-a@corp.cn"),
                decision: Decision::Pass,
                decided_at: Utc::now(),
            },
        );
        orchestrator.poll_audit_results().map_err(AppError::from)?;
        print_status(&orchestrator, &link.token)?;
    }

    print_final(&orchestrator, &link.token)
}

fn print_status(orchestrator: &DemoOrchestrator, token: &LinkToken) -> Result<(), AppError> {
    let view = orchestrator.owner_view(token).map_err(AppError::from)?;
    println!("  status: {} ({})", view.status, view.detail);
    Ok(())
}

fn print_final(orchestrator: &DemoOrchestrator, token: &LinkToken) -> Result<(), AppError> {
    let info = orchestrator.approval_info(token).map_err(AppError::from)?;
    let rendered =
        serde_json::to_string_pretty(&info).unwrap_or_else(|_| "<unrenderable>".to_string());
    println!("\nFinal approval record:\n{rendered}");
    Ok(())
}
