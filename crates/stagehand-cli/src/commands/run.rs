use super::{
    colorize_level, exit_for, json_pretty, load_signals, spin_fail, spin_ok, spinner, Context,
    EXIT_FAILURE,
};
use stagehand_core::{CoreError, PassReport, StatusLevel};
use std::path::Path;

fn print_report(report: &PassReport) {
    for m in &report.invalidated {
        println!("  invalidated {m}");
    }
    for applied in &report.applied {
        println!("  ✓ {}", applied.action);
    }
    for failed in &report.failed {
        println!("  ✗ {}: {}", failed.action, failed.error);
    }
    for action in &report.skipped {
        println!("  - {action} (skipped)");
    }
    if report.interrupted {
        println!("  pass interrupted");
    }
}

pub fn run(ctx: &Context, signals: &Path, converge: bool, max_passes: usize) -> Result<u8, String> {
    let engine = ctx.open_engine()?;
    let signals = load_signals(signals)?;

    let pb = if ctx.json {
        None
    } else {
        Some(spinner(&format!("provisioning {}...", signals.unit.name)))
    };
    let result = if converge {
        engine.converge(&signals, max_passes)
    } else {
        engine.run_pass(&signals).map(|r| vec![r])
    };
    let reports = match result {
        Ok(reports) => reports,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "pass aborted");
            }
            return Err(match e {
                CoreError::StoreLocked(_) => format!("store lock: {e}"),
                other => other.to_string(),
            });
        }
    };

    let ok = reports.iter().all(PassReport::is_ok);
    let Some(last) = reports.last() else {
        return Err("no pass was run".to_owned());
    };
    if let Some(ref pb) = pb {
        if ok {
            spin_ok(pb, &format!("{} pass(es) completed", reports.len()));
        } else {
            spin_fail(pb, "pass completed with failures");
        }
    }

    if ctx.json {
        if converge {
            println!("{}", json_pretty(&reports)?);
        } else {
            println!("{}", json_pretty(last)?);
        }
    } else {
        for (i, report) in reports.iter().enumerate() {
            if converge {
                println!("pass {}:", i + 1);
            }
            print_report(report);
        }
        println!(
            "{}: {} ({})",
            last.unit,
            colorize_level(last.status.level),
            last.status.message
        );
    }

    // A blocked unit reports blocked even when actions failed too.
    if ok || last.status.level == StatusLevel::Blocked {
        Ok(exit_for(last.status.level))
    } else {
        Ok(EXIT_FAILURE)
    }
}
