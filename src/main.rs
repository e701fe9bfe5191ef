//! bucketsync - 把本地目录上传到对象存储
//!
//! 退出码: 0 成功, 1 参数错误, 2 初始化失败, 3 运行失败, 130 被中断

use bucketsync::config::{parse_error_exit_code, CliArgs, SyncConfig};
use bucketsync::error::SyncError;
use bucketsync::logging::init_logging;
use bucketsync::{create_storage, SyncEngine};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_error_exit_code(&e));
        }
    };

    // 初始化日志系统，guard 持有到进程退出
    let _log_guard = init_logging(&args.log_config());

    let config = match SyncConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let storage = match create_storage(&config.bucket, &config.backend).await {
        Ok(storage) => storage,
        Err(e) => {
            let e = SyncError::Setup(e.context("could not initialize storage backend"));
            error!("{}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    let engine = SyncEngine::new(config, storage);

    // 收到中断信号后协作式取消，正在进行的上传会继续完成
    let cancel_flag = engine.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在停止...");
            cancel_flag.store(true, Ordering::SeqCst);
        }
    });

    match engine.run().await {
        Ok(report) => {
            if !report.persisted {
                warn!("上传记录未能保存，下次运行可能重复上传本次的文件");
            }
            info!(
                "run {}: 上传 {} 个文件, 跳过 {} 个, 耗时 {}s",
                report.run_id,
                report.files_uploaded,
                report.files_skipped,
                (report.finished_at - report.started_at).num_seconds()
            );
            println!("Sync Complete");
            ExitCode::from(report.exit_code())
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
