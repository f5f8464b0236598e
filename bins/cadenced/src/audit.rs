use crate::module::{Module, ModuleCtx};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Consumes the per-attempt responses and writes the audit trail.
pub struct Audit;

impl Module for Audit {
    fn name(&self) -> &'static str { "audit" }
    fn spawn(self: Box<Self>, mut ctx: ModuleCtx) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            let mut responses = ctx.sched.subscribe();
            let (mut ok, mut failed) = (0u64, 0u64);
            loop {
                tokio::select! {
                    msg = responses.recv() => match msg {
                        Ok(resp) if resp.is_success_code() => {
                            ok += 1;
                            info!(job_id = %resp.job_id, code = resp.code, at = %resp.timestamp, "dispatch ok");
                        }
                        Ok(resp) => {
                            failed += 1;
                            warn!(job_id = %resp.job_id, code = resp.code, at = %resp.timestamp, message = %resp.message, "dispatch failed");
                        }
                        Err(RecvError::Lagged(skipped)) => warn!("audit lagging, {} responses skipped", skipped),
                        Err(RecvError::Closed) => break,
                    },
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            info!("audit stopping ok={} failed={}", ok, failed);
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
