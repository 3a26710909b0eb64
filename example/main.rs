use std::path::PathBuf;
use std::sync::Arc;

use stardag::pipeline::sparkify_graph;
use stardag::*;
use tracing_subscriber::EnvFilter;

fn init_logging(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

// Sample objects standing in for the udacity-dend bucket.
fn demo_warehouse(config: &PipelineConfig) -> InMemoryWarehouse {
    let warehouse = InMemoryWarehouse::new();
    let log_data = ObjectLocation::new(config.s3_bucket.as_str(), config.log_data_prefix.as_str());
    let song_data = ObjectLocation::new(config.s3_bucket.as_str(), config.song_data_prefix.as_str());

    warehouse.put_object(format!("{}/2018/11/2018-11-01-events.json", log_data.uri()), 15);
    warehouse.put_object(format!("{}/2018/11/2018-11-02-events.json", log_data.uri()), 22);
    warehouse.put_object(format!("{}/A/A/A/TRAAAAK128F9318786.json", song_data.uri()), 4);
    warehouse.put_object(format!("{}/A/B/C/TRABCEI128F424C983.json", song_data.uri()), 6);
    warehouse
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let mut config = PipelineConfig::load(config_path.as_deref())?;
    for name in [config.redshift_conn_id.clone(), config.aws_conn_id.clone()] {
        config
            .connections
            .entry(name)
            .or_insert_with(|| Credentials::new("demo"));
    }

    let graph = sparkify_graph(&config, &InMemoryTemplateStore::sparkify())?;

    println!("=== {} ===", config.dag_id);
    print!("{}", graph.render_tree());

    let warehouse = demo_warehouse(&config);
    let pool = ConnectionPool::new(Arc::new(warehouse.clone()), config.max_parallelism);
    let executor = Executor::new(Arc::new(config.connection_registry()), pool)
        .with_max_parallelism(config.max_parallelism);

    let mut ctx = RunContext::new();
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let start = std::time::Instant::now();
    let report = executor.run(&graph, &mut ctx).await?;

    println!("=== finished in {:?} ===", start.elapsed());
    print!("{}", report.summary());
    for table in &config.quality_tables {
        println!("{:>10}: {} rows", table, warehouse.row_count(table).unwrap_or_default());
    }
    println!("{}", report.to_json()?);

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
