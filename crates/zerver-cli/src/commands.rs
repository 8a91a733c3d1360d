use anyhow::{Result, bail};
use zerver_common::MigrationKey;
use zerver_db::{MigrationExecutor, MigrationGraph, MigrationStatus, MigrationTarget, PlanStep};

/// Resolves a migration by exact name or unique prefix, e.g. `0616`.
pub fn resolve_name(graph: &MigrationGraph, app: &str, name: &str) -> Result<MigrationKey> {
    let exact = MigrationKey::new(app, name);
    if graph.contains(&exact) {
        return Ok(exact);
    }

    let candidates: Vec<&MigrationKey> = graph
        .keys()
        .filter(|k| k.app_label == app && k.name.starts_with(name))
        .collect();
    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        [] => bail!("cannot find a migration matching '{name}' in app '{app}'"),
        _ => bail!("more than one migration matches '{name}' in app '{app}'"),
    }
}

pub fn migration_targets(
    executor: &MigrationExecutor,
    app: Option<&str>,
    target: Option<&str>,
) -> Result<Vec<MigrationTarget>> {
    match (app, target) {
        (None, None) => Ok(executor
            .graph()
            .apps()
            .into_iter()
            .map(|app| MigrationTarget::Latest(app.to_string()))
            .collect()),
        (Some(app), None) => Ok(vec![MigrationTarget::Latest(app.to_string())]),
        (Some(app), Some("zero")) => Ok(vec![MigrationTarget::Zero(app.to_string())]),
        (Some(app), Some(name)) => Ok(vec![MigrationTarget::To(resolve_name(
            executor.graph(),
            app,
            name,
        )?)]),
        (None, Some(_)) => bail!("a migration target needs an app label"),
    }
}

pub fn print_plan(executor: &MigrationExecutor, steps: &[PlanStep]) -> Result<()> {
    println!("Planned operations:");
    if steps.is_empty() {
        println!("  No planned migration operations.");
    }
    for step in steps {
        println!("{}", step.key);
        let migration = executor.graph().node(&step.key)?;
        for operation in &migration.operations {
            let prefix = if step.backwards { "Undo " } else { "" };
            println!("    {prefix}{}", operation.describe());
        }
    }
    Ok(())
}

/// Filter directive for the subscriber: a non-empty `RUST_LOG` wins, then
/// `--log-level`, then the configured level, then `info`.
pub fn resolve_log_filter(
    rust_log: Option<&str>,
    flag: Option<&str>,
    configured: Option<&str>,
) -> String {
    [rust_log, flag, configured]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|level| !level.is_empty())
        .unwrap_or("info")
        .to_string()
}

pub fn filter_statuses(statuses: Vec<MigrationStatus>, app: Option<&str>) -> Vec<MigrationStatus> {
    statuses
        .into_iter()
        .filter(|s| app.is_none_or(|app| s.key.app_label == app))
        .collect()
}

pub fn print_statuses(statuses: &[MigrationStatus]) {
    let mut current_app: Option<&str> = None;
    for status in statuses {
        if current_app != Some(status.key.app_label.as_str()) {
            current_app = Some(status.key.app_label.as_str());
            println!("{}", status.key.app_label);
        }
        let mark = if status.applied.is_some() { "X" } else { " " };
        let note = if status.external { " (prior history)" } else { "" };
        println!(" [{mark}] {}{note}", status.key.name);
    }
}
