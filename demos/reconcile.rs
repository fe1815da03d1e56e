//! Reconciles a CSR file against a JSON parameter record.
//!
//! ```text
//! cargo run --example reconcile -- params.json [request.csr] [--check]
//! ```
//!
//! The CSR is rewritten in place when it does not match, and the outcome is printed as JSON.

use std::error::Error;
use std::path::PathBuf;

use csrkit::csr::params::CsrParams;
use csrkit::reconcile::{CsrReconciler, ReconcileOptions};
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let (flags, mut args): (Vec<String>, Vec<String>) =
        std::env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let check_mode = flags.iter().any(|flag| flag == "--check");
    if args.is_empty() {
        return Err("usage: reconcile <params.json> [request.csr] [--check]".into());
    }
    let params_path = args.remove(0);
    let csr_path = args.into_iter().next().map(PathBuf::from);

    let params: CsrParams = serde_json::from_slice(&std::fs::read(&params_path)?)?;
    let mut reconciler = CsrReconciler::from_params(&params)?;
    if let Some(path) = &csr_path {
        reconciler.set_existing(std::fs::read(path).ok());
    }

    let outcome = reconciler.reconcile(ReconcileOptions {
        emit_csr: true,
        check_mode,
    })?;

    if let (true, false, Some(path), Some(pem)) =
        (outcome.changed, check_mode, &csr_path, &outcome.csr)
    {
        std::fs::write(path, pem)?;
        info!("wrote {}", path.display());
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
