use serde::Serialize;
use slotline_core::config::{AppConfig, LoadOptions, StorageBackend, TransportKind};
use slotline_db::{open_storage, ping};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_channel_transport(&config));
            checks.push(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["channel_transport", "storage_readiness"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_channel_transport(config: &AppConfig) -> DoctorCheck {
    match config.channel.transport {
        TransportKind::Log => DoctorCheck {
            name: "channel_transport",
            status: CheckStatus::Pass,
            details: "log transport selected; outbound messages are written to the log".to_string(),
        },
        TransportKind::Http => DoctorCheck {
            name: "channel_transport",
            status: CheckStatus::Pass,
            details: format!("http transport posting to `{}`", config.channel.api_base_url),
        },
    }
}

fn check_storage(config: &AppConfig) -> DoctorCheck {
    if config.database.backend == StorageBackend::Memory {
        return DoctorCheck {
            name: "storage_readiness",
            status: CheckStatus::Pass,
            details: "memory backend selected; data is lost on restart".to_string(),
        };
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "storage_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let storage = open_storage(&config.database).await.map_err(|error| error.to_string())?;
        let Some(pool) = storage.pool else {
            return Ok(());
        };
        let reachable = ping(&pool).await.map_err(|error| format!("database ping failed: {error}"));
        pool.close().await;
        reachable
    });

    match result {
        Ok(()) => DoctorCheck {
            name: "storage_readiness",
            status: CheckStatus::Pass,
            details: format!("connected and migrated `{}`", config.database.url),
        },
        Err(error) => {
            DoctorCheck { name: "storage_readiness", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
