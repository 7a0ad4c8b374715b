use std::io::Write;
use std::sync::Arc;
use anyhow::Context;
use parking_lot::Mutex;
use tracing::{info, warn};
use video_uploader::config::get_config;
use video_uploader::core::{LocalFile, ProgressCallback, UploadOrchestrator, UploadOutcome};
use video_uploader::logging::init_logging;
use video_uploader::protocol::{HttpBackend, HttpStorage};
use video_uploader::utils::{format_bytes, format_duration, TransferMeter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let file_path = std::env::args()
        .nth(1)
        .context("usage: video-uploader <file>")?;

    let config = get_config().context("failed to load config")?;
    init_logging(&config.logging.level);

    let backend = Arc::new(HttpBackend::new(config.to_backend_config())?);
    // 大文件的 PUT 可能持续很久，存储端不设总超时
    let storage = Arc::new(HttpStorage::new());
    let orchestrator = Arc::new(UploadOrchestrator::new(backend, storage, config.upload.clone())?);

    let file = LocalFile::open(&file_path)
        .await
        .with_context(|| format!("can't open {}", file_path))?;
    info!(file = %file.name, size = %format_bytes(file.size), content_type = %file.content_type, "uploading");

    let meter = Arc::new(Mutex::new(TransferMeter::new(file.size)));
    let on_progress: ProgressCallback = {
        let meter = meter.clone();
        Arc::new(move |progress| {
            let mut meter = meter.lock();
            meter.update(progress);
            eprint!("\r{}", meter.render());
            let _ = std::io::stderr().flush();
        })
    };

    let mut task = orchestrator.prepare(file).await?;

    // Ctrl-C 只打标记，清理由上传流程自己完成
    let canceller = tokio::spawn({
        let orchestrator = orchestrator.clone();
        let video_id = task.video_id.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(video_id = %video_id, "interrupt received, cancelling upload");
                orchestrator.cancel(&video_id).await;
            }
        }
    });

    let outcome = orchestrator.run(&mut task, Some(on_progress)).await;
    canceller.abort();
    orchestrator.teardown();
    eprintln!();

    let elapsed = format_duration(meter.lock().elapsed());
    match outcome? {
        UploadOutcome::Completed(record) => {
            info!(video_id = %record.id, status = ?record.status, elapsed = %elapsed, "upload completed");
            println!("{}", record.id);
        }
        UploadOutcome::Cancelled(video_id) => {
            info!(video_id = %video_id, elapsed = %elapsed, "upload cancelled");
            println!("cancelled");
        }
    }

    Ok(())
}
