use clap::Parser;

#[derive(Parser, Default, Debug, Clone)]
#[clap(
    name = "veritaserum",
    version = "0.1.0",
    about = "service-virtualization sidecar: records and replays HTTP, MySQL, PostgreSQL, Redis and DynamoDB calls."
)]
pub struct EngineArgs {
    #[clap(long, value_name = "WORKS", default_value_t = 4)]
    pub works: usize,
    #[clap(long, value_name = "HTTP_PORT", default_value_t = 9999)]
    pub http_port: u16,
    #[clap(long, value_name = "POSTGRES_PORT", default_value_t = 54320)]
    pub postgres_port: u16,
    #[clap(long, value_name = "MYSQL_PORT", default_value_t = 33060)]
    pub mysql_port: u16,
    #[clap(long, value_name = "REDIS_PORT", default_value_t = 6380)]
    pub redis_port: u16,
    #[clap(long, value_name = "ADMIN_PORT", default_value_t = 8080)]
    pub admin_port: u16,
    #[clap(long, value_name = "ENABLE METRICS COLLECTOR", default_value_t = false)]
    pub enable_metrics: bool,
    #[clap(long, value_name = "LOG_LEVEL")]
    pub log_level: Option<String>,
    #[clap(long, value_name = "STATE_FILE", default_value = "veritaserum-state.json")]
    pub state_file: String,
    /// Headless replay: load a suite, serve it, never start the admin API.
    #[clap(long, default_value_t = false)]
    pub replay: bool,
    /// Suite document to replay; required with --replay.
    #[clap(long, value_name = "SUITE_FILE", required_if_eq("replay", "true"))]
    pub suite: Option<String>,
    /// Exit on a deadline, for CI runs.
    #[clap(long, value_name = "SECONDS")]
    pub exit_after_secs: Option<u64>,
}

impl EngineArgs {
    pub fn bind_addr(&self, port: u16) -> String {
        format!("0.0.0.0:{port}")
    }
}
