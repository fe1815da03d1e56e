//! The reconciliation driver: compare an existing CSR with the desired state and rebuild
//! it when they differ.
//!
//! ```text
//! no existing CSR      -> build
//! existing, unreadable -> build
//! existing, readable   -> match check -> match: keep / mismatch: build
//! ```
//!
//! The private key is loaded lazily, at most once per reconciler.

use log::{debug, info};
use serde::Serialize;

use crate::csr::builder::{Capabilities, CsrBuilder};
use crate::csr::info::{CsrSummary, summarize};
use crate::csr::matcher::{CsrMatcher, Mismatch};
use crate::csr::params::{CsrParams, DesiredState};
use crate::csr::{Csr, CsrParser, DefaultCsrParser};
use crate::error::Result;
use crate::key::{KeyLoader, KeyPair, PrivateKeySource};

/// Outcome of comparing the existing CSR with the desired state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    NoExistingCsr,
    Unparseable,
    Matches,
    Mismatch(Mismatch),
}

impl Assessment {
    /// Whether a new CSR has to be built.
    pub fn needs_build(&self) -> bool {
        !matches!(self, Assessment::Matches)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Include the resulting CSR (PEM) in the outcome.
    pub emit_csr: bool,
    /// Report whether a change is needed without building anything.
    pub check_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub before: CsrSummary,
    pub after: CsrSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub csr: Option<String>,
    pub diff: Diff,
}

/// Drives one reconciliation run for a desired state and private key.
pub struct CsrReconciler<L = PrivateKeySource, P = DefaultCsrParser> {
    desired: DesiredState,
    key_loader: L,
    parser: P,
    builder: CsrBuilder,
    existing: Option<Vec<u8>>,
    key: Option<KeyPair>,
    generated: Option<Csr>,
}

impl CsrReconciler {
    /// Normalizes `params` and resolves its private key reference.
    pub fn from_params(params: &CsrParams) -> Result<Self> {
        let desired = DesiredState::from_params(params)?;
        Ok(Self::new(desired, params.private_key_source()?))
    }
}

impl<L: KeyLoader> CsrReconciler<L, DefaultCsrParser> {
    pub fn new(desired: DesiredState, key_loader: L) -> Self {
        Self::with_parser(desired, key_loader, DefaultCsrParser)
    }
}

impl<L: KeyLoader, P: CsrParser> CsrReconciler<L, P> {
    pub fn with_parser(desired: DesiredState, key_loader: L, parser: P) -> Self {
        Self {
            desired,
            key_loader,
            parser,
            builder: CsrBuilder::new(Capabilities::detect()),
            existing: None,
            key: None,
            generated: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.builder = CsrBuilder::new(capabilities);
        self
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    /// Sets the bytes of the existing CSR; `None` means there is none yet.
    pub fn set_existing(&mut self, bytes: Option<Vec<u8>>) {
        self.existing = bytes;
        self.generated = None;
    }

    pub fn has_existing(&self) -> bool {
        self.existing.is_some()
    }

    /// Classifies the existing CSR. Loads the private key only for a readable CSR.
    pub fn assess(&mut self) -> Result<Assessment> {
        let existing = self.parse_existing();
        self.assess_parsed(existing.as_ref())
    }

    fn parse_existing(&self) -> Option<Result<Csr>> {
        self.existing
            .as_deref()
            .map(|bytes| self.parser.parse(bytes))
    }

    fn assess_parsed(&mut self, existing: Option<&Result<Csr>>) -> Result<Assessment> {
        let csr = match existing {
            None => {
                debug!("no existing CSR");
                return Ok(Assessment::NoExistingCsr);
            }
            Some(Err(e)) => {
                debug!("existing CSR cannot be parsed: {e}");
                return Ok(Assessment::Unparseable);
            }
            Some(Ok(csr)) => csr,
        };

        let spki = ensure_key_loaded(&mut self.key, &self.key_loader)?.as_spki()?;
        let assessment = match CsrMatcher::new(&self.desired, spki).first_mismatch(csr) {
            None => Assessment::Matches,
            Some(mismatch) => {
                debug!("existing CSR does not match: {mismatch}");
                Assessment::Mismatch(mismatch)
            }
        };
        Ok(assessment)
    }

    pub fn needs_regeneration(&mut self) -> Result<bool> {
        Ok(self.assess()?.needs_build())
    }

    /// Builds and signs a new CSR, replacing any previously generated one.
    pub fn generate(&mut self) -> Result<&Csr> {
        let key = ensure_key_loaded(&mut self.key, &self.key_loader)?;
        let csr = self.builder.build(&self.desired, key)?;
        Ok(self.generated.insert(csr))
    }

    /// Runs the full reconciliation.
    ///
    /// The emitted CSR is always PEM: the rebuilt request, or the existing one re-encoded when
    /// it is kept. An unreadable existing CSR kept in check mode is not emitted.
    pub fn reconcile(&mut self, options: ReconcileOptions) -> Result<ReconcileOutcome> {
        let existing = self.parse_existing();
        let before = match &existing {
            None => CsrSummary::Absent,
            Some(Ok(csr)) => summarize(csr),
            Some(Err(_)) => CsrSummary::Unparseable,
        };
        let changed = self.assess_parsed(existing.as_ref())?.needs_build();

        if changed && !options.check_mode {
            self.generate()?;
        }

        let kept = existing.and_then(|parsed| parsed.ok());
        let result = self.generated.as_ref().or(kept.as_ref());
        let after = match &self.generated {
            Some(csr) => summarize(csr),
            None => before.clone(),
        };
        info!(
            "CSR {}",
            match (changed, options.check_mode) {
                (false, _) => "is up to date",
                (true, true) => "would be regenerated",
                (true, false) => "was regenerated",
            }
        );

        let csr = match (options.emit_csr, result) {
            (true, Some(csr)) => Some(csr.to_pem()?),
            _ => None,
        };

        Ok(ReconcileOutcome {
            changed,
            csr,
            diff: Diff { before, after },
        })
    }
}

fn ensure_key_loaded<'k, L: KeyLoader>(
    slot: &'k mut Option<KeyPair>,
    loader: &L,
) -> Result<&'k KeyPair> {
    let key = match slot.take() {
        Some(key) => key,
        None => {
            debug!("loading private key");
            loader.load()?
        }
    };
    Ok(slot.insert(key))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::CsrKitError;
    use crate::oid::COMMON_NAME;

    /// Hands out a fixed key and counts how often it was asked to.
    struct CountingLoader {
        loads: Rc<Cell<usize>>,
    }

    impl KeyLoader for CountingLoader {
        fn load(&self) -> Result<KeyPair> {
            self.loads.set(self.loads.get() + 1);
            Ok(KeyPair::EcdsaP256(
                p256::ecdsa::SigningKey::from_slice(&[11u8; 32])
                    .map_err(|e| CsrKitError::Key(e.to_string()))?,
            ))
        }
    }

    fn reconciler() -> (CsrReconciler<CountingLoader>, Rc<Cell<usize>>) {
        let loads = Rc::new(Cell::new(0));
        let desired = DesiredState::with_subject(vec![(COMMON_NAME, "example.com".to_string())]);
        let loader = CountingLoader {
            loads: loads.clone(),
        };
        (CsrReconciler::new(desired, loader), loads)
    }

    #[test]
    fn check_mode_without_existing_csr_does_not_load_the_key() {
        let (mut reconciler, loads) = reconciler();
        let outcome = reconciler
            .reconcile(ReconcileOptions {
                emit_csr: true,
                check_mode: true,
            })
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.csr, None);
        assert_eq!(outcome.diff.before, CsrSummary::Absent);
        assert_eq!(loads.get(), 0);
    }

    #[test]
    fn unparseable_csr_is_rebuilt() {
        let (mut reconciler, _) = reconciler();
        reconciler.set_existing(Some(b"garbage".to_vec()));
        assert_eq!(reconciler.assess().unwrap(), Assessment::Unparseable);

        let outcome = reconciler
            .reconcile(ReconcileOptions {
                emit_csr: true,
                check_mode: false,
            })
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.diff.before, CsrSummary::Unparseable);
        assert!(outcome.diff.after.can_parse());
        assert!(
            outcome
                .csr
                .unwrap()
                .starts_with("-----BEGIN CERTIFICATE REQUEST-----")
        );
    }

    #[test]
    fn key_is_loaded_once() {
        let (mut reconciler, loads) = reconciler();
        let pem = reconciler.generate().unwrap().to_pem().unwrap();
        reconciler.set_existing(Some(pem.into_bytes()));
        assert_eq!(reconciler.assess().unwrap(), Assessment::Matches);
        assert!(!reconciler.needs_regeneration().unwrap());
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn key_errors_are_fatal() {
        struct FailingLoader;
        impl KeyLoader for FailingLoader {
            fn load(&self) -> Result<KeyPair> {
                Err(CsrKitError::BadPassphrase("wrong passphrase".to_string()))
            }
        }

        let desired = DesiredState::with_subject(vec![(COMMON_NAME, "example.com".to_string())]);
        let mut reconciler = CsrReconciler::new(desired, FailingLoader);
        assert!(matches!(
            reconciler.reconcile(ReconcileOptions::default()),
            Err(CsrKitError::BadPassphrase(_))
        ));
    }

    #[test]
    fn diff_uses_the_configured_parser() {
        struct RejectingParser;
        impl CsrParser for RejectingParser {
            fn parse(&self, _: &[u8]) -> Result<Csr> {
                Err(CsrKitError::Parse("not accepted".to_string()))
            }
        }

        let (mut reconciler, _) = reconciler();
        let pem = reconciler.generate().unwrap().to_pem().unwrap();

        let loads = Rc::new(Cell::new(0));
        let desired = DesiredState::with_subject(vec![(COMMON_NAME, "example.com".to_string())]);
        let mut rejecting =
            CsrReconciler::with_parser(desired, CountingLoader { loads }, RejectingParser);
        rejecting.set_existing(Some(pem.into_bytes()));
        let outcome = rejecting
            .reconcile(ReconcileOptions {
                emit_csr: false,
                check_mode: true,
            })
            .unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.diff.before, CsrSummary::Unparseable);
        assert_eq!(outcome.diff.after, CsrSummary::Unparseable);
        assert_eq!(outcome.csr, None);
    }

    #[test]
    fn kept_der_request_is_emitted_as_pem() {
        let (mut reconciler, _) = reconciler();
        let generated = reconciler.generate().unwrap().clone();
        reconciler.set_existing(Some(generated.to_der().unwrap()));

        let outcome = reconciler
            .reconcile(ReconcileOptions {
                emit_csr: true,
                check_mode: false,
            })
            .unwrap();
        assert!(!outcome.changed);
        let pem = outcome.csr.unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert_eq!(Csr::from_pem(&pem).unwrap(), generated);
    }
}
