pub enum RunMode { Paper, Live }

pub fn consumed_pointers(mode: RunMode) -> &'static [&'static str] {
    match mode {
        RunMode::Paper => PAPER,
        RunMode::Live => LIVE,
    }
}

static PAPER: &[&str] = &[
    "/autonomy",
    "/heartbeat",
    "/execution",
    "/scheduler",
    "/eventScan",
    "/alerts",
];

static LIVE: &[&str] = &[
    "/autonomy",
    "/heartbeat",
    "/execution",
    "/hyperliquid",
    "/wallet",
    "/scheduler",
    "/eventScan",
    "/alerts",
];
