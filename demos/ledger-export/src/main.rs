//! Ledger Export Demo
//!
//! Exports ledger entries through a transactional traversal. Each exported
//! entry is marked inside the transaction bound to the drive, so the marks
//! only become visible when the export runs to completion.
//!
//! # Running the Example
//!
//! ```bash
//! RUST_LOG=info,traverse_tx_runtime=debug cargo run -p ledger-export
//! ```
//!
//! Set `TRAVERSE_TX_UNSUPPORTED_MANAGER=reject` or
//! `TRAVERSE_TX_EMISSION_BUFFER=4` to change the gate configuration.

#![allow(missing_docs)]

use futures::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use traverse_tx_core::attribute::{NameMatchAttributeSource, RollbackRule, TransactionAttribute};
use traverse_tx_core::context::TraverseContext;
use traverse_tx_core::emission::Emittable;
use traverse_tx_core::invocation::{Invocation, MethodDescriptor, Returned, TargetType};
use traverse_tx_core::traversable::{BoxTraversable, Traversable};
use traverse_tx_runtime::interceptor::MethodInterceptor;
use traverse_tx_runtime::metrics::MetricsRecorder;
use traverse_tx_runtime::{
    InterceptorConfig, ManagerRef, TransactionManagerResolver, TransactionSupport,
    TraverseSupportInterceptor,
};
use traverse_tx_testing::{ExampleError, InMemoryTransactionManager, ScriptedTraversable, ValidationError};

const REPOSITORY: &str = "LedgerRepository";
const IMPLEMENTATION: &str = "InMemoryLedgerRepository";

#[derive(Clone, Debug)]
struct Entry {
    id: u32,
    amount_cents: i64,
}

fn ledger() -> Vec<Entry> {
    vec![
        Entry { id: 1, amount_cents: 12_500 },
        Entry { id: 2, amount_cents: -4_000 },
        Entry { id: 3, amount_cents: 99_900 },
        Entry { id: 4, amount_cents: 150 },
    ]
}

/// Entries whose export marks go through the drive's transaction.
fn export_source(manager: &InMemoryTransactionManager, entries: Vec<Entry>) -> ScriptedTraversable<Entry> {
    let manager = manager.clone();
    ScriptedTraversable::new(entries).with_hook(move |entry: &Entry, ctx: &TraverseContext| {
        if entry.amount_cents == 0 {
            return Err(ValidationError(format!("entry {} has no amount", entry.id)).into());
        }
        manager.write(ctx, format!("exported/{}", entry.id), entry.amount_cents.to_string())?;
        Ok(())
    })
}

fn export_call(
    method: &str,
    source: ScriptedTraversable<Entry>,
) -> Invocation<'static, (), Entry, ExampleError> {
    let raw: BoxTraversable<Entry, ExampleError> = Box::new(source);
    Invocation::new(
        Arc::new(MethodDescriptor::traversable(REPOSITORY, method)),
        Some(TargetType::new(IMPLEMENTATION)),
        move || Ok(Returned::Traversable(Some(raw))),
    )
}

fn stream_call(
    method: &str,
    source: ScriptedTraversable<Entry>,
) -> Invocation<'static, (), Entry, ExampleError> {
    let raw = Emittable::new(source);
    Invocation::new(
        Arc::new(MethodDescriptor::emittable(REPOSITORY, method)),
        Some(TargetType::new(IMPLEMENTATION)),
        move || Ok(Returned::Emittable(Some(raw))),
    )
}

fn drive(entries: &BoxTraversable<Entry, ExampleError>, limit: usize) -> (usize, Result<bool, ExampleError>) {
    let mut seen = 0;
    let result = entries.sequence(
        &mut |entry| {
            seen += 1;
            tracing::info!(id = entry.id, amount_cents = entry.amount_cents, "Exported entry");
            if seen >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        },
        &TraverseContext::new(),
    );
    (seen, result)
}

fn wrapped(returned: Returned<(), Entry, ExampleError>) -> anyhow::Result<BoxTraversable<Entry, ExampleError>> {
    returned
        .into_traversable()
        .ok_or_else(|| anyhow::anyhow!("repository returned no entries"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,traverse_tx_runtime=debug,ledger_export=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Ledger Export Demo");

    // 2. Install the metrics recorder
    let mut recorder = MetricsRecorder::new();
    recorder.install()?;

    // 3. Wire the gate
    let manager = InMemoryTransactionManager::with_name("ledgerTransactionManager");
    let attributes = NameMatchAttributeSource::new()
        .with_method("export*", TransactionAttribute::new().with_name("ledger-export"))
        .with_method(
            "stream*",
            TransactionAttribute::new().with_rule(RollbackRule::rollback_for::<ValidationError>()),
        );
    let support = Arc::new(
        TransactionSupport::new(
            TransactionManagerResolver::new().with_default(ManagerRef::platform(manager.clone())),
        )
        .with_attribute_source(Arc::new(attributes)),
    );
    let config = InterceptorConfig::from_env()?;
    tracing::info!(?config, "Gate configured");
    let gate = TraverseSupportInterceptor::standard(support, config);

    // 4. Full export commits
    let entries = wrapped(gate.invoke(export_call("exportAll", export_source(&manager, ledger())))?)?;
    let (exported, result) = drive(&entries, usize::MAX);
    tracing::info!(exported, ?result, committed = manager.committed_len(), "Full export finished");

    // 5. A preview stops early and rolls back
    let preview_manager = InMemoryTransactionManager::with_name("previewTransactionManager");
    let preview_support = Arc::new(
        TransactionSupport::new(
            TransactionManagerResolver::new().with_default(ManagerRef::platform(preview_manager.clone())),
        )
        .with_attribute_source(Arc::new(
            NameMatchAttributeSource::new().with_method("export*", TransactionAttribute::new()),
        )),
    );
    let preview_gate = TraverseSupportInterceptor::standard(preview_support, InterceptorConfig::default());
    let preview = wrapped(
        preview_gate.invoke(export_call("exportPreview", export_source(&preview_manager, ledger())))?,
    )?;
    let (shown, result) = drive(&preview, 2);
    tracing::info!(
        shown,
        ?result,
        committed = preview_manager.committed_len(),
        rollbacks = preview_manager.rollback_count(),
        "Preview finished"
    );

    // 6. A bad entry fails the export and rolls it back
    let mut broken = ledger();
    broken.push(Entry { id: 5, amount_cents: 0 });
    let before = manager.committed_len();
    let entries = wrapped(gate.invoke(export_call("exportBroken", export_source(&manager, broken)))?)?;
    match drive(&entries, usize::MAX) {
        (exported, Err(err)) => {
            tracing::warn!(exported, error = %err, "Export failed");
        }
        (exported, Ok(_)) => tracing::info!(exported, "Export unexpectedly succeeded"),
    }
    tracing::info!(
        committed_before = before,
        committed_after = manager.committed_len(),
        "Failed export left committed entries untouched"
    );

    // 7. Streaming export over the emission path
    let streamed = gate
        .invoke(stream_call("streamAll", export_source(&manager, ledger())))?
        .into_emittable()
        .ok_or_else(|| anyhow::anyhow!("repository returned no stream"))?;
    let mut stream = streamed.stream();
    let mut delivered = 0;
    while let Some(item) = stream.next().await {
        let entry = item?;
        delivered += 1;
        tracing::info!(id = entry.id, "Streamed entry");
    }
    tracing::info!(delivered, commits = manager.commit_count(), "Stream finished");

    // 8. Show what was recorded
    for event in manager.events() {
        tracing::debug!(?event, "Transaction event");
    }
    if let Some(rendered) = recorder.render() {
        println!("{rendered}");
    }

    tracing::info!("Ledger Export Demo finished");
    Ok(())
}
