use std::path::{Path, PathBuf};

use appledger_extract::envelope;
use chrono::{DateTime, Duration, Utc};

use crate::config::EmailConfig;

/// `.eml` files in the inbox directory that look like recent Apple receipts,
/// newest first and capped at `max_results`.
pub fn select_receipts(cfg: &EmailConfig, now: DateTime<Utc>) -> std::io::Result<Vec<PathBuf>> {
    let cutoff = (now - Duration::days(i64::from(cfg.max_age_days))).timestamp();
    let sender = cfg.sender_filter.to_lowercase();
    let subject = cfg.subject_filter.to_lowercase();

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&cfg.inbox_dir)? {
        let path = entry?.path();
        if !path.is_file() || !is_eml(&path) {
            continue;
        }
        let raw = std::fs::read(&path)?;
        let env = match envelope(&raw) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(date) = env.date else {
            tracing::debug!("Skipping {}: no Date header", path.display());
            continue;
        };
        if date >= cutoff
            && env.from.to_lowercase().contains(&sender)
            && env.subject.to_lowercase().contains(&subject)
        {
            found.push((date, path));
        }
    }

    found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    found.truncate(cfg.max_results as usize);
    tracing::info!("Found {} receipt mail(s) in {}", found.len(), cfg.inbox_dir.display());
    Ok(found.into_iter().map(|(_, p)| p).collect())
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("eml"))
}
