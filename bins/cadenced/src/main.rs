mod audit;
mod module;
mod runner;
mod web;

use std::sync::Arc;

use cadence_core::{
    cfg::{self, AppId, Config},
    clock::{Clock, SystemClock},
    invoker::RecipientInvoker,
    logx,
    recipient::RecipientKind,
    store::{self, KvJobStore},
    Scheduler,
};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::audit::Audit;
use crate::module::{Module, ModuleCtx};

const APP: AppId = AppId {
    qualifier: "com",
    organization: "local",
    application: env!("CARGO_PKG_NAME"),
};

fn main() -> anyhow::Result<()> {
    let cfg = cfg::load_or_init(&APP)?;
    logx::init(&cfg.log_level, cfg.log_format);
    build_runtime()?.block_on(run(cfg))
}

#[cfg(feature = "rt-single")]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

#[cfg(not(feature = "rt-single"))]
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let store_dir = cfg.store_dir(&APP)?;
    info!("{} boot store={}", APP.application, store_dir.display());

    let store = KvJobStore::new(store::open_default(&store_dir)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let timeout = cfg.scheduler.dispatch_timeout();
    let invoker = RecipientInvoker::new(timeout, clock.clone())
        .with_transport(RecipientKind::Http, runner::http_transport(timeout)?);
    let settings = cfg.scheduler.settings(num_cpus::get());
    info!(
        "scheduler max_concurrency={} max_attempts={} dispatch_timeout={:?}",
        settings.max_concurrency, settings.retry.max_attempts, timeout
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (sched, sched_task) = Scheduler::new(store, invoker, clock, settings).spawn(shutdown_rx.clone())?;
    let ctx = ModuleCtx { sched, shutdown: shutdown_rx };

    #[allow(unused_mut)]
    let mut modules: Vec<Box<dyn Module>> = vec![Box::new(Audit)];
    #[cfg(feature = "web-api")]
    if let Some(addr) = &cfg.web.http_addr {
        modules.push(Box::new(web::WebServer::new(addr.parse()?)));
    }
    #[cfg(not(feature = "web-api"))]
    if cfg.web.http_addr.is_some() {
        warn!("web.http_addr is set but this build has no web-api feature");
    }

    let mut tasks = Vec::new();
    for m in modules {
        let name = m.name();
        info!("starting module {}", name);
        tasks.push((name, m.spawn(ctx.clone())));
    }
    drop(ctx);

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    sched_task.await?;
    for (name, task) in tasks {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("module {} failed: {:#}", name, e),
            Err(e) => warn!("module {} panicked: {}", name, e),
        }
    }
    info!("{} stopped", APP.application);
    Ok(())
}
