//! Hybrid router CLI: 额度状态查询、回退演练与路由查询的命令行工具
//!
//! Usage:
//!   hybrid-router-cli status                              Show backend and credit status
//!   hybrid-router-cli simulate <percent>                  Simulate credit usage and show the result
//!   hybrid-router-cli query [--secondary] <sql>           Run a statement through the router
//!   hybrid-router-cli create-table [--secondary] <name> <col:type>...
//!   hybrid-router-cli test-connections                    Run SELECT 1 on both backends
//!
//! Budget state lives in the process, so `simulate` and `reset` only affect
//! the status printed by that invocation.

use anyhow::{bail, Context};
use hybrid_db_router::{ColumnSchema, HybridRouter, RouterConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "version" | "--version" | "-V" => {
            cmd_version();
            return Ok(());
        }
        "help" | "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        "status" | "simulate" | "reset" | "query" | "create-table" | "test-connections" => {}
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }

    let config = RouterConfig::load().context("loading configuration")?;
    let router = HybridRouter::from_config(&config).context("building router")?;
    router.initialize().await;

    let outcome = run(&router, &args[1], &args[2..]).await;
    router.close().await;
    // Exit code 2 means the command ran but a backend refused it.
    if !outcome? {
        std::process::exit(2);
    }
    Ok(())
}

async fn run(router: &HybridRouter, command: &str, args: &[String]) -> anyhow::Result<bool> {
    match command {
        "status" => print_json(&router.status()),
        "simulate" => {
            let Some(raw) = args.first() else {
                bail!("simulate requires a usage percentage");
            };
            let pct: f64 = raw
                .parse()
                .with_context(|| format!("invalid usage percentage: {raw}"))?;
            print_json(&router.simulate_usage(pct))
        }
        "reset" => print_json(&router.reset()),
        "query" => {
            let (prefer_primary, rest) = split_secondary_flag(args);
            if rest.is_empty() {
                bail!("query requires a SQL statement");
            }
            let sql = rest.join(" ");
            let routed = router.execute(&sql, prefer_primary).await?;
            print_json(&routed)
        }
        "create-table" => {
            let (prefer_primary, rest) = split_secondary_flag(args);
            let Some((name, columns)) = rest.split_first() else {
                bail!("create-table requires a table name");
            };
            let schema = parse_columns(columns)?;
            let created = router.create_table(name, &schema, prefer_primary).await;
            print_json(&serde_json::json!({
                "table": name,
                "created": created,
                "backend": router.pins().and_then(|p| p.get(name)),
            }))?;
            Ok(created)
        }
        "test-connections" => {
            let report = router.test_connections().await;
            print_json(&report)?;
            Ok(report.all_ok())
        }
        other => bail!("Unknown command: {other}"),
    }
}

fn print_usage() {
    println!(
        r#"hybrid-router-cli: 混合数据后端路由命令行工具

USAGE:
    hybrid-router-cli <COMMAND> [OPTIONS]

COMMANDS:
    status                                   Show backend availability and credit usage
    simulate <percent>                       Simulate credit usage (0-100)
    reset                                    Reset usage and leave fallback mode
    query [--secondary] <sql>                Execute SQL through the router
    create-table [--secondary] <name> <col:type>...
                                             Create a table on the routed backend
    test-connections                         Run SELECT 1 on both backends
    version                                  Show version information
    help                                     Show this help message

ENVIRONMENT:
    DATABRICKS_HOST, DATABRICKS_TOKEN, DATABRICKS_SQL_WAREHOUSE_ID
    DATABRICKS_CREDIT_THRESHOLD, DATABRICKS_MONTHLY_LIMIT
    DATABASE_URL, HYBRID_QUERY_TIMEOUT_SECS, HYBRID_PG_MAX_CONNECTIONS
    HYBRID_PIN_TABLES, HYBRID_ROUTER_CONFIG (YAML file)
    RUST_LOG                                 Log filter (e.g. info, hybrid_db_router=debug)"#
    );
}

fn cmd_version() {
    println!("hybrid-router-cli {}", env!("CARGO_PKG_VERSION"));
}

fn split_secondary_flag(args: &[String]) -> (bool, Vec<String>) {
    let secondary = args.iter().any(|a| a == "--secondary");
    let rest = args.iter().filter(|a| *a != "--secondary").cloned().collect();
    (!secondary, rest)
}

fn parse_columns(specs: &[String]) -> anyhow::Result<ColumnSchema> {
    if specs.is_empty() {
        bail!("create-table requires at least one <col:type> column");
    }
    let mut schema = ColumnSchema::new();
    for raw in specs {
        let Some((name, ty)) = raw.split_once(':') else {
            bail!("column must be written as name:type, got {raw}");
        };
        schema.push(name, ty);
    }
    Ok(schema)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<bool> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(true)
}
