use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use goalboard_delivery::{build_transport, DeliveryConfig, RetryPolicy};
use goalboard_engine::{
    format_amount, format_percent, ChunkLimits, PageCatalog, ReportPage, SalesDesk,
    WindowCalculator,
};
use goalboard_scheduler::{ReportFanout, ReportScheduler, ReportSchedulerConfig};
use goalboard_store::SqliteBoardStore;
use goalboard_types::{CycleKind, ReportTarget};

use crate::cli_args::{Cli, CliCommand, CliDeliveryFlags};

pub(crate) async fn open_desk(cli: &Cli) -> Result<SalesDesk> {
    let catalog = match &cli.catalog {
        Some(path) => PageCatalog::load(path)
            .with_context(|| format!("failed to load page catalog {}", path.display()))?,
        None => PageCatalog::builtin().context("failed to load built-in page catalog")?,
    };
    let store = SqliteBoardStore::new(&cli.db_path)
        .with_context(|| format!("failed to open {}", cli.db_path.display()))?;
    let limits = ChunkLimits {
        ceiling: cli.chunk_ceiling,
        safety_margin: cli.chunk_safety_margin,
    };
    let desk = SalesDesk::open(
        Arc::new(store),
        catalog,
        WindowCalculator::new(cli.timezone),
        limits,
    )
    .await
    .context("failed to load goals and overrides")?;
    Ok(desk)
}

fn build_fanout(desk: Arc<SalesDesk>, flags: &CliDeliveryFlags) -> Result<ReportFanout> {
    let config = DeliveryConfig {
        mode: flags.delivery_mode.into(),
        http_timeout_ms: flags.http_timeout_ms,
        telegram_api_base: flags.telegram_api_base.clone(),
        telegram_bot_token: flags.telegram_bot_token.clone(),
    };
    let transport = build_transport(&config)?;
    let retry = RetryPolicy::new(
        flags.retry_max_attempts,
        Duration::from_secs(flags.retry_max_wait_seconds),
    )?;
    Ok(ReportFanout::new(desk, transport, retry))
}

pub(crate) async fn execute(cli: Cli) -> Result<()> {
    let desk = Arc::new(open_desk(&cli).await?);
    let now = Utc::now();
    match cli.command {
        CliCommand::Serve { delivery, schedule } => {
            let fanout = build_fanout(desk, &delivery)?;
            let mut scheduler = ReportScheduler::new(
                ReportSchedulerConfig {
                    cron: schedule.cron,
                    timezone: cli.timezone,
                    state_path: schedule.state_path,
                    poll_interval: Duration::from_millis(schedule.poll_interval_ms),
                    stale_after: Duration::from_secs(schedule.stale_after_seconds),
                },
                fanout,
            )?;
            scheduler.run().await?;
        }
        CliCommand::RunOnce { delivery } => {
            let fanout = build_fanout(desk, &delivery)?;
            let summary = fanout.run_report(now).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        CliCommand::Record {
            team,
            page,
            amount,
            at,
        } => {
            let sale = desk
                .record_sale(&team, &page, &amount, at.unwrap_or(now))
                .await?;
            println!(
                "✅ Logged {} for {} ({})",
                format_amount(sale.amount),
                sale.page,
                sale.team
            );
        }
        CliCommand::Goalboard { team } => {
            print_pages(&desk.goalboard(&team, now).await?);
        }
        CliCommand::Quota { team, days } => {
            print_pages(&desk.quota(&team, days, now).await?);
        }
        CliCommand::Summary { team, days } => {
            let summary = desk.summary(&team, days, now).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        CliCommand::Leaderboard { team } => {
            let ranked = desk.leaderboard(&team, now).await?;
            if ranked.is_empty() {
                println!("No sales recorded yet.");
            }
            for (index, (page, total)) in ranked.iter().enumerate() {
                println!("{}. {} {}", index + 1, page, format_amount(*total));
            }
        }
        CliCommand::RedPages { team } => {
            let red = desk.red_pages(&team, now).await?;
            if red.pages.is_empty() {
                println!("No red pages for {}.", red.shift.shift.label());
            }
            for page in &red.pages {
                let goal = page.goal.map(format_amount).unwrap_or_default();
                let percent = page.percent.map(format_percent).unwrap_or_default();
                println!(
                    "{} {} {} / {} ({})",
                    page.marker(),
                    page.page,
                    format_amount(page.total),
                    goal,
                    percent
                );
            }
        }
        CliCommand::SetGoals {
            team,
            cycle,
            entries,
        } => {
            let outcome = desk
                .set_goals(&team, cycle.into(), &entries.join("\n"))
                .await?;
            for applied in &outcome.applied {
                println!("✅ {} {}", applied.page, format_amount(applied.amount));
            }
            for rejected in &outcome.rejected {
                println!("⚠️ {}: {}", rejected.entry, rejected.reason);
            }
        }
        CliCommand::Goals { cycle } => {
            let cycle = CycleKind::from(cycle);
            let goals = desk.goals(cycle).await;
            if goals.is_empty() {
                println!("No {cycle} goals set.");
            }
            for (page, amount) in &goals {
                println!("{} {}", page, format_amount(*amount));
            }
        }
        CliCommand::ClearGoals { cycle } => {
            let cycle = CycleKind::from(cycle);
            let removed = desk.clear_goals(cycle).await?;
            println!("Cleared {removed} {cycle} goals.");
        }
        CliCommand::SetOverride {
            team,
            page,
            amount,
            scope,
        } => {
            let applied = desk
                .set_override(&team, &page, &amount, scope.into())
                .await?;
            println!("✏️ {} set to {}", applied.page, format_amount(applied.amount));
        }
        CliCommand::ClearOverride { page, cycle } => {
            let (page, removed) = desk.clear_override(&page, cycle.into()).await?;
            if removed {
                println!("Cleared override for {page}.");
            } else {
                println!("No override set for {page}.");
            }
        }
        CliCommand::ResetDaily { team } => {
            let removed = desk.reset_daily(&team, now).await?;
            println!("Removed {removed} sales recorded today.");
        }
        CliCommand::RegisterTeam { team } => {
            let team = desk.register_team(&team).await?;
            println!("Registered {team}.");
        }
        CliCommand::RemoveTeam { team } => {
            let team = desk.remove_team(&team).await?;
            println!("Removed {team}.");
        }
        CliCommand::ListTeams => {
            for team in desk.list_teams().await? {
                println!("{team}");
            }
        }
        CliCommand::SetDestination {
            team,
            channel_id,
            thread_id,
        } => {
            let target = ReportTarget::new(channel_id, thread_id);
            let team = desk.set_team_destination(&team, &target).await?;
            println!("{team} reports go to {}.", target.label());
        }
        CliCommand::Destinations => {
            print_destinations(&desk).await?;
        }
        CliCommand::SetGlobalDestination {
            channel_id,
            thread_id,
        } => {
            let target = ReportTarget::new(channel_id, thread_id);
            desk.set_global_destination(&target).await?;
            println!("All team reports go to {}.", target.label());
        }
        CliCommand::ClearGlobalDestination => {
            if desk.clear_global_destination().await? {
                println!("Global destination cleared.");
            } else {
                println!("No global destination was set.");
            }
        }
        CliCommand::Pages => {
            for (tag, page) in desk.pages() {
                println!("{tag} {page}");
            }
        }
    }
    Ok(())
}

fn print_pages(pages: &[ReportPage]) {
    for (index, page) in pages.iter().enumerate() {
        if index > 0 {
            println!();
        }
        println!("{}", page.text);
    }
}

async fn print_destinations(desk: &SalesDesk) -> Result<()> {
    if let Some(target) = desk.global_destination().await? {
        println!("global {} (per-team destinations are skipped)", target.label());
    }
    for destination in desk.team_destinations().await? {
        println!("{} {}", destination.team, destination.target.label());
    }
    Ok(())
}
