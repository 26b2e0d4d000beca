use std::path::Path;

use crate::config::Config;

/// Configuration problems that would make the reader misbehave at runtime.
pub fn problems(cfg: &Config, data_dir: &Path) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();

    // Check 1: data dir writable
    let probe = data_dir.join(".write-probe");
    let writable = std::fs::create_dir_all(data_dir)
        .and_then(|_| std::fs::write(&probe, b"probe"))
        .and_then(|_| std::fs::remove_file(&probe));
    if let Err(e) = writable {
        errors.push(format!(
            "data directory {} is not writable: {e}\n  \
             → pass --data-dir pointing at a writable location",
            data_dir.display()
        ));
    }

    // Check 2: each GPIO role on its own pin
    let gpio = cfg.gpio();
    let roles = [("success", gpio.success), ("fail", gpio.fail), ("momentary", gpio.momentary)];
    for (i, (name, pulse)) in roles.iter().enumerate() {
        let Some(pulse) = pulse else { continue };
        for (other, other_pulse) in &roles[i + 1..] {
            if other_pulse.is_some_and(|o| o.pin == pulse.pin) {
                errors.push(format!("--{name}-pin and --{other}-pin both use GPIO {}", pulse.pin));
            }
        }
    }

    // Check 3: APDU deadline fits in the session budget
    if cfg.apdu_timeout_ms == 0 || cfg.session_budget_ms == 0 {
        errors.push("APDU timeout and session budget must be non-zero".into());
    } else if cfg.apdu_timeout_ms > cfg.session_budget_ms {
        errors.push(format!(
            "--apdu-timeout-ms ({}) exceeds --session-budget-ms ({})",
            cfg.apdu_timeout_ms, cfg.session_budget_ms
        ));
    }

    errors
}

pub fn check(cfg: &Config, data_dir: &Path) -> anyhow::Result<()> {
    let errors = problems(cfg, data_dir);
    if errors.is_empty() {
        return Ok(());
    }

    for err in &errors {
        eprintln!("ERROR: {err}");
    }
    anyhow::bail!("{} preflight check(s) failed", errors.len());
}
