//! Server time, major time zones and module uptime
//!
//! A background timer keeps a snapshot fresh for the dashboard; the chat
//! command always computes a new one.

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::modules::html::{command_list, escape, module_fragment};
use crate::modules::prelude::*;
use crate::modules::traits::default_api;

const DEFAULT_REFRESH_SECS: u64 = 30;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Label and UTC offset in minutes
const ZONES: &[(&str, i32)] = &[
    ("UTC", 0),
    ("EST (US Eastern)", -5 * 60),
    ("PST (US Pacific)", -8 * 60),
    ("CET (Central Europe)", 60),
    ("IST (India)", 5 * 60 + 30),
    ("JST (Japan)", 9 * 60),
];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ZoneTime {
    pub label: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimeSnapshot {
    pub server_time: String,
    pub uptime: String,
    pub zones: Vec<ZoneTime>,
    pub refreshed_at: String,
}

impl TimeSnapshot {
    pub fn at(now: DateTime<Utc>, started: DateTime<Utc>) -> Self {
        let zones = ZONES
            .iter()
            .filter_map(|(label, minutes)| {
                let offset = FixedOffset::east_opt(minutes * 60)?;
                Some(ZoneTime {
                    label: label.to_string(),
                    time: now.with_timezone(&offset).format(TIME_FORMAT).to_string(),
                })
            })
            .collect();

        Self {
            server_time: now.with_timezone(&Local).format(TIME_FORMAT).to_string(),
            uptime: format_uptime(now - started),
            zones,
            refreshed_at: now.to_rfc3339(),
        }
    }
}

/// `"{h}h {m}m {s}s"`
pub fn format_uptime(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let (hours, rest) = (total / 3600, total % 3600);
    format!("{}h {}m {}s", hours, rest / 60, rest % 60)
}

pub struct TimeInfoModule {
    meta: ModuleMeta,
    refresh: Duration,
    started: DateTime<Utc>,
    snapshot: Arc<Mutex<TimeSnapshot>>,
}

pub fn create(spec: ModuleSpec) -> Result<Arc<dyn Module>, ModuleError> {
    let refresh_secs = spec
        .manifest
        .setting_u64("refresh_secs")
        .unwrap_or(DEFAULT_REFRESH_SECS)
        .max(1);
    let meta = ModuleMeta::new(
        &spec.id,
        "Time Info",
        "Shows local/server time and major timezones.",
    )
    .with_icon("clock")
    .with_version("1.1.1")
    .apply_spec(&spec);

    let started = Utc::now();
    Ok(Arc::new(TimeInfoModule {
        meta,
        refresh: Duration::from_secs(refresh_secs),
        started,
        snapshot: Arc::new(Mutex::new(TimeSnapshot::at(started, started))),
    }))
}

impl TimeInfoModule {
    fn current(&self) -> TimeSnapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn time_embed(snapshot: &TimeSnapshot) -> Embed {
    let mut embed = Embed::new("Time Information")
        .field("Server Time", snapshot.server_time.clone(), false)
        .field("Uptime", snapshot.uptime.clone(), false);
    for zone in &snapshot.zones {
        embed = embed.field(zone.label.clone(), zone.time.clone(), true);
    }
    embed
}

#[async_trait]
impl Module for TimeInfoModule {
    fn meta(&self) -> &ModuleMeta {
        &self.meta
    }

    fn commands(&self, _ctx: &ModuleContext) -> Vec<Command> {
        let started = self.started;
        vec![Command::new(
            "timeinfo",
            "Show current time in major timezones.",
            move |_inv: CommandContext| {
                let snapshot = TimeSnapshot::at(Utc::now(), started);
                async move { Ok(Reply::Embed(time_embed(&snapshot))) }
            },
        )]
    }

    fn html(&self, ctx: &ModuleContext) -> String {
        let snapshot = self.current();
        let rows: String = snapshot
            .zones
            .iter()
            .map(|z| {
                format!(
                    "<div class=\"command-item\"><code>{}</code> <span>{}</span></div>\n",
                    escape(&z.label),
                    escape(&z.time)
                )
            })
            .collect();
        let clocks = format!(
            "<div class=\"info-section\">\n<h3>🕒 Time Zones</h3>\n<div class=\"command-list\">\n{}</div>\n<p class=\"text-muted\">Uptime {}</p>\n</div>",
            rows,
            escape(&snapshot.uptime)
        );
        module_fragment(
            &self.meta,
            &format!("{}\n{}", clocks, command_list(ctx.prefix(), &ctx.commands())),
        )
    }

    async fn handle_api(&self, action: &str, _request: ApiRequest, ctx: &ModuleContext) -> ApiResponse {
        match action {
            "zones" => match serde_json::to_value(self.current()) {
                Ok(value) => ApiResponse::ok(value),
                Err(e) => ApiResponse::error(e.to_string(), 500),
            },
            _ => default_api(&self.meta, action, ctx),
        }
    }

    async fn on_load(&self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let snapshot = self.snapshot.clone();
        let started = self.started;
        ctx.spawn_interval(self.refresh, move || {
            let fresh = TimeSnapshot::at(Utc::now(), started);
            *snapshot.lock().unwrap_or_else(PoisonError::into_inner) = fresh;
            async {}
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Caller;
    use crate::modules::manager::tests::fixture;
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[test]
    fn test_snapshot_offsets() {
        let started = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 9).unwrap();
        let snapshot = TimeSnapshot::at(now, started);

        let time = |label: &str| {
            snapshot
                .zones
                .iter()
                .find(|z| z.label == label)
                .map(|z| z.time.clone())
                .unwrap()
        };
        assert_eq!(time("UTC"), "2024-01-01 12:05:09");
        assert_eq!(time("EST (US Eastern)"), "2024-01-01 07:05:09");
        assert_eq!(time("IST (India)"), "2024-01-01 17:35:09");
        assert_eq!(time("JST (Japan)"), "2024-01-01 21:05:09");
        assert_eq!(snapshot.uptime, "2h 5m 9s");
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(chrono::Duration::seconds(0)), "0h 0m 0s");
        assert_eq!(format_uptime(chrono::Duration::seconds(3661)), "1h 1m 1s");
        assert_eq!(format_uptime(chrono::Duration::seconds(-5)), "0h 0m 0s");
    }

    #[tokio::test]
    async fn test_timer_refreshes_and_stops_on_unload() {
        let fx = fixture().await;
        fx.write_user("time_info", "kind = \"time_info\"\n[settings]\nrefresh_secs = 1");
        fx.manager.load_all().await;

        let module = fx.manager.get("time_info").await.unwrap();
        assert_eq!(module.meta().version, "1.1.1");
        assert_eq!(module.context.tasks().len(), 1);

        let zones = fx
            .manager
            .call_api("time_info", "zones", ApiRequest::get(HashMap::new()))
            .await
            .unwrap();
        assert_eq!(zones.body["zones"].as_array().unwrap().len(), ZONES.len());

        match fx
            .manager
            .services()
            .registry
            .dispatch("!", "!timeinfo", Caller::default())
            .await
        {
            Some(Reply::Embed(embed)) => {
                assert_eq!(embed.title, "Time Information");
                assert_eq!(embed.fields.len(), 2 + ZONES.len());
            }
            other => panic!("unexpected reply {:?}", other),
        }

        fx.manager.unload_module("time_info").await.unwrap();
        assert!(module.context.tasks().is_empty());
    }
}
