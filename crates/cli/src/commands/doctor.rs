use concierge_agent::client_for;
use concierge_core::config::{AppConfig, LlmProvider, LoadOptions};
use concierge_db::{connect_with_settings, migrations};
use serde::Serialize;

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

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            serde_json::json!({
                "overall_status": CheckStatus::Fail,
                "summary": "doctor serialization failed",
                "error": error.to_string(),
            })
            .to_string()
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let checks = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => vec![
            DoctorCheck::pass("config_validation", "configuration loaded and validated"),
            check_model_provider(&config),
            check_session_store(&config),
        ],
        Err(error) => {
            let mut checks = vec![DoctorCheck::fail("config_validation", error.to_string())];
            checks.extend(["model_provider_readiness", "session_store_connectivity"].map(|name| {
                DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                }
            }));
            checks
        }
    };

    let failed = checks.iter().filter(|check| check.status != CheckStatus::Pass).count();
    let (overall_status, summary) = if failed == 0 {
        (CheckStatus::Pass, "doctor: all readiness checks passed".to_string())
    } else {
        (CheckStatus::Fail, format!("doctor: {failed} readiness check(s) did not pass"))
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_model_provider(config: &AppConfig) -> DoctorCheck {
    let name = "model_provider_readiness";
    match client_for(&config.llm) {
        Ok(client) => {
            let details = match config.llm.provider {
                LlmProvider::Offline => "offline keyword model; no network access needed".to_string(),
                LlmProvider::OpenAi | LlmProvider::Ollama => format!(
                    "{} client ready for model `{}` (api key {})",
                    client.name(),
                    config.llm.model,
                    if config.llm.api_key.is_some() { "set" } else { "not set" }
                ),
            };
            DoctorCheck::pass(name, details)
        }
        Err(error) => DoctorCheck::fail(name, error.to_string()),
    }
}

fn check_session_store(config: &AppConfig) -> DoctorCheck {
    let name = "session_store_connectivity";
    if config.database.is_in_memory_store() {
        return DoctorCheck::pass(
            name,
            "in-process session store; conversations do not survive restarts",
        );
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(name, format!("failed to initialize async runtime: {error}"));
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to session store: {error}"))?;

        let applied = migrations::applied_count(&pool)
            .await
            .map_err(|error| format!("failed to read migration state: {error}"))?;
        pool.close().await;
        Ok::<i64, String>(applied)
    });

    match result {
        Ok(applied) => DoctorCheck::pass(
            name,
            format!("connected using `{}` ({applied} migrations applied)", config.database.url),
        ),
        Err(error) => DoctorCheck::fail(name, error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let rows = report.checks.iter().map(|check| {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        format!("- [{marker}] {}: {}", check.name, check.details)
    });

    std::iter::once(report.summary.clone()).chain(rows).collect::<Vec<_>>().join("\n")
}
