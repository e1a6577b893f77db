use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mqk_policy::AutonomyPolicyState;
use mqk_scheduler::{JobStore, PgJobStore};

#[derive(Parser)]
#[command(name = "mqk")]
#[command(about = "MiniQuantDesk V4 CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> engine -> risk -> stress...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Scheduled-job commands
    Job {
        #[command(subcommand)]
        cmd: JobCmd,
    },

    /// Event-scan commands
    Scan {
        #[command(subcommand)]
        cmd: ScanCmd,
    },

    /// Autonomy control-plane commands
    Autonomy {
        #[command(subcommand)]
        cmd: AutonomyCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum JobCmd {
    /// List all registered jobs and their lease/schedule state
    List,
    /// Push a job's next_run_at far into the future so it stops firing
    Cancel {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
enum ScanCmd {
    /// Force the named job (typically the discovery scan) to be due now,
    /// regardless of its normal schedule
    Force {
        #[arg(long, default_value = "discovery_scan")]
        job: String,
    },
}

#[derive(Subcommand)]
enum AutonomyCmd {
    /// Enter observation-only mode until the given duration elapses
    Pause {
        #[arg(long, default_value_t = 3600)]
        seconds: i64,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Clear observation-only mode
    Resume,
    /// Toggle whether autonomy is permitted to execute live vs observation-only
    FullAuto {
        #[arg(long)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            match cmd {
                DbCmd::Status => {
                    let s = mqk_db::status(&pool).await?;
                    println!("db_ok={} has_scheduler_jobs_table={}", s.ok, s.has_scheduler_jobs_table);
                }
                DbCmd::Migrate => {
                    mqk_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = mqk_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Job { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            let store = PgJobStore::new(pool);
            match cmd {
                JobCmd::List => {
                    for row in store.list().await? {
                        println!(
                            "{}\tstatus={:?}\tnext_run_at={}\tfailures={}\towner={}",
                            row.name,
                            row.status,
                            row.next_run_at,
                            row.consecutive_failures,
                            row.lock_owner.as_deref().unwrap_or("-"),
                        );
                    }
                }
                JobCmd::Cancel { name } => {
                    let canceled = store.cancel(&name, Utc::now()).await?;
                    println!("canceled={canceled}");
                }
            }
        }

        Commands::Scan { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            let store = PgJobStore::new(pool);
            match cmd {
                ScanCmd::Force { job } => {
                    let forced = store.force_due(&job, Utc::now()).await?;
                    println!("forced={forced}");
                }
            }
        }

        Commands::Autonomy { cmd } => {
            let pool = mqk_db::connect_from_env().await?;
            let now = Utc::now();
            let mut state = load_state(&pool).await?;

            match cmd {
                AutonomyCmd::Pause { seconds, reason } => {
                    state.observation_only_until = Some(now + chrono::Duration::seconds(seconds));
                    state.reason = reason.or(Some("paused via cli".to_string()));
                }
                AutonomyCmd::Resume => {
                    state.observation_only_until = None;
                }
                AutonomyCmd::FullAuto { enabled } => {
                    state.full_auto_override = Some(enabled);
                }
            }
            state.updated_at = Some(now);
            save_state(&pool, &state).await?;
            println!(
                "observation_only={} full_auto_override={:?}",
                state.is_observation_only(now),
                state.full_auto_override
            );
        }
    }

    Ok(())
}

async fn load_state(pool: &sqlx::PgPool) -> Result<AutonomyPolicyState> {
    let row = mqk_db::load_policy_state(pool).await?;
    Ok(match row {
        Some(r) => AutonomyPolicyState {
            min_edge_override: r.min_edge_override,
            max_trades_per_scan_override: r.max_trades_per_scan_override.map(|v| v as u32),
            leverage_cap_override: r.leverage_cap_override,
            observation_only_until: r.observation_only_until,
            full_auto_override: r.full_auto_override,
            reason: r.reason,
            updated_at: Some(r.updated_at),
        },
        None => AutonomyPolicyState::default(),
    })
}

async fn save_state(pool: &sqlx::PgPool, state: &AutonomyPolicyState) -> Result<()> {
    let row = mqk_db::PolicyStateRow {
        min_edge_override: state.min_edge_override,
        max_trades_per_scan_override: state.max_trades_per_scan_override.map(|v| v as i64),
        leverage_cap_override: state.leverage_cap_override,
        observation_only_until: state.observation_only_until,
        full_auto_override: state.full_auto_override,
        reason: state.reason.clone(),
        updated_at: state.updated_at.unwrap_or_else(Utc::now),
    };
    mqk_db::save_policy_state(pool, &row).await
}
