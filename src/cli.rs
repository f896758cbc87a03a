use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "script-crawler",
    version,
    about = "Capture every script and network request a page loads, for a ranked list of sites"
)]
pub struct Cli {
    /// TOML 配置文件（默认读取当前目录下的 crawler.toml，如果存在）
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// 数据集文件（每行 `rank,url`），覆盖配置中的 dataset_path
    #[arg(long, value_name = "FILE", global = true)]
    pub dataset: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 在当前进程内抓取闭区间 [START, END] 的行
    Scrape {
        #[arg(value_name = "START")]
        start: u64,
        #[arg(value_name = "END")]
        end: u64,
    },
    /// 切分数据集并用多个 worker 进程抓取
    Crawl {
        /// 起始行（含，从 0 开始）
        #[arg(long, value_name = "N")]
        start: Option<u64>,
        /// 结束行（含）
        #[arg(long, value_name = "N")]
        end: Option<u64>,
        /// worker 进程数
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        workers: Option<u64>,
    },
    /// 由主进程启动，从 stdin 读取任务
    #[command(hide = true)]
    Worker,
}
