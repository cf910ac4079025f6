//! Text rendering of a view for terminal surfaces

use crate::model::Bookmark;
use crate::sync::{Phase, ViewState};
use chrono::{DateTime, Datelike, Utc};
use std::fmt::Write;

/// Age of a timestamp relative to `now`, in the short form lists use.
///
/// Under a minute is "Just now"; then minutes, hours, and days up to a
/// week; older dates are printed, with the year only when it differs.
pub fn format_relative(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(created_at);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else if days < 7 {
        format!("{}d ago", days)
    } else if created_at.year() == now.year() {
        created_at.format("%b %-d").to_string()
    } else {
        created_at.format("%b %-d, %Y").to_string()
    }
}

fn render_row(out: &mut String, bookmark: &Bookmark, deleting: bool, now: DateTime<Utc>) {
    let marker = if deleting { " (deleting...)" } else { "" };
    let _ = writeln!(
        out,
        "{}  {}{}\n    {}\n    {}",
        bookmark.id,
        bookmark.title,
        marker,
        bookmark.url,
        format_relative(bookmark.created_at, now)
    );
}

/// Render the whole view as plain text
pub fn render_view(view: &ViewState, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    match (&view.identity, view.phase) {
        (None, _) | (_, Phase::Unauthenticated) => {
            out.push_str("Not signed in. Run `linkshelf login` to manage bookmarks.\n");
            return out;
        }
        (Some(identity), Phase::Loading) => {
            let _ = writeln!(out, "Signed in as {}", identity.display_label());
            out.push_str("Loading bookmarks...\n");
            return out;
        }
        (Some(identity), Phase::Ready) => {
            let _ = writeln!(out, "Signed in as {}", identity.display_label());
        }
    }

    if let Some(error) = &view.load_error {
        let _ = writeln!(out, "warning: {}", error);
    }
    if view.snapshot.is_empty() {
        out.push_str("No bookmarks yet. Add your first one with `linkshelf add <url>`.\n");
        return out;
    }
    for bookmark in view.snapshot.iter() {
        render_row(&mut out, bookmark, view.is_deleting(&bookmark.id), now);
    }
    out
}
