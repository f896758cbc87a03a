use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::{error, info};

use script_crawler::cli::{Cli, Command};
use script_crawler::logger;
use script_crawler::orchestrator::{crawl, run_worker_process, scrape, CrawlOptions};
use script_crawler::{Config, WorkRange};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    // 加载配置
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dataset) = cli.dataset {
        config.dataset_path = dataset;
    }

    match cli.command {
        Command::Scrape { start, end } => {
            logger::init_orchestrator(&config.log_level)?;
            if start > end {
                bail!("起始行 {start} 大于结束行 {end}");
            }
            let range = WorkRange::new(config.dataset_path.clone(), start, end);

            match scrape(&config, &range).await {
                Ok(summary) => {
                    info!("✓ 区间 {} 处理完成: {:?}", range, summary);
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) if e.is_range_fatal() => {
                    error!("❌ 浏览器初始化失败: {}", e);
                    Ok(ExitCode::from(1))
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Crawl {
            start,
            end,
            workers,
        } => {
            logger::init_orchestrator(&config.log_level)?;
            let options = CrawlOptions {
                start,
                end,
                workers: workers.map(|n| usize::try_from(n).unwrap_or(usize::MAX)),
                config_path: cli.config,
            };
            crawl(&config, options).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Worker => {
            let pid = std::process::id();
            let log_path = logger::init_worker(pid, &config.log_dir, &config.log_level)?;
            info!("worker {} 启动，日志: {}", pid, log_path.display());

            match run_worker_process(&config).await {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(e) => {
                    error!("❌ worker 退出: {}", e);
                    Ok(ExitCode::from(1))
                }
            }
        }
    }
}
