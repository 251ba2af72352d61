use metrics::{describe_counter, describe_gauge, describe_histogram};

pub const ENGINE_CAPTURES: &str = "veritaserum_captures_total";
pub const ENGINE_PLAYBACKS: &str = "veritaserum_playbacks_total";
pub const ENGINE_CURR_CONN: &str = "veritaserum_curr_connections";
pub const ENGINE_DISPATCH_LATENCY: &str = "veritaserum_dispatch_latency_us";

pub fn describe_all() {
    describe_counter!(
        ENGINE_CAPTURES,
        "Total pending captures registered by the interception engine."
    );
    describe_counter!(
        ENGINE_PLAYBACKS,
        "Total configured responses played back on the wire."
    );
    describe_gauge!(
        ENGINE_CURR_CONN,
        "Open client connections across all protocol listeners."
    );
    describe_histogram!(
        ENGINE_DISPATCH_LATENCY,
        "Latency of one decoded request through the store, in microseconds."
    );
}
