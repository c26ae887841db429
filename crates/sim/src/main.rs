//! Contention drill: many concurrent checkouts against one option.
//!
//! Seeds `SIM_INITIAL_STOCK` units, fires `SIM_CONCURRENCY` deductions of
//! `SIM_QUANTITY` each through the configured backend, then checks that the
//! final balance matches what was sold.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};

use stockguard_core::{OptionId, OrderId, ProductId};
use stockguard_infra::stock_store::{
    InMemoryCells, InMemoryInventoryStore, InventoryStore, OptimisticInventoryStore, PostgresInventoryStore,
};
use stockguard_infra::{InventoryBackend, InventoryConfig, InventoryError, InventoryService};

const SIM_OPTION: OptionId = OptionId::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Drill {
    initial_stock: i64,
    concurrency: usize,
    quantity: i64,
}

impl Drill {
    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str, default: i64| -> anyhow::Result<i64> {
            match lookup(name) {
                Some(raw) => raw.trim().parse().with_context(|| format!("{name}='{raw}'")),
                None => Ok(default),
            }
        };

        let concurrency = read("SIM_CONCURRENCY", 150)?;
        if concurrency <= 0 {
            bail!("SIM_CONCURRENCY must be positive");
        }

        Ok(Self {
            initial_stock: read("SIM_INITIAL_STOCK", 100)?,
            concurrency: usize::try_from(concurrency)?,
            quantity: read("SIM_QUANTITY", 1)?,
        })
    }
}

async fn build_store(config: &InventoryConfig) -> anyhow::Result<Arc<dyn InventoryStore>> {
    let store: Arc<dyn InventoryStore> = match config.backend {
        InventoryBackend::Memory => Arc::new(InMemoryInventoryStore::with_bulk_mode(config.bulk_mode)),
        InventoryBackend::Optimistic => Arc::new(OptimisticInventoryStore::with_max_retries(
            InMemoryCells::new(),
            config.max_cas_retries,
        )),
        InventoryBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL missing for postgres backend")?;
            let store = PostgresInventoryStore::connect(url, config.max_connections, config.bulk_mode).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };
    Ok(store)
}

#[derive(Debug, Default)]
struct Tally {
    sold: i64,
    succeeded: usize,
    insufficient: usize,
    other: usize,
}

async fn run(service: Arc<InventoryService<Arc<dyn InventoryStore>>>, drill: Drill) -> anyhow::Result<Tally> {
    let handles: Vec<_> = (0..drill.concurrency)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .deduct_stock(SIM_OPTION, drill.quantity, OrderId::new(n as i64 + 1))
                    .await
            })
        })
        .collect();

    let mut tally = Tally::default();
    for handle in handles {
        match handle.await? {
            Ok(record) => {
                tally.sold += record.deducted_quantity;
                tally.succeeded += 1;
            }
            Err(InventoryError::InsufficientStock { .. }) => tally.insufficient += 1,
            Err(err) => {
                tracing::warn!(error = %err, "deduction failed");
                tally.other += 1;
            }
        }
    }
    Ok(tally)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockguard_observability::init();

    let config = InventoryConfig::from_env()?;
    let drill = Drill::from_lookup(|name| std::env::var(name).ok())?;
    tracing::info!(config = %serde_json::to_string(&config)?, ?drill, "starting contention drill");

    let store = build_store(&config).await?;
    let service = Arc::new(InventoryService::new(store));

    // Postgres rows survive between runs.
    if service.store().get_item(SIM_OPTION).await?.is_some() {
        bail!("option {SIM_OPTION} already exists; drop it before rerunning");
    }
    service
        .register_item(SIM_OPTION, ProductId::new(1), drill.initial_stock, true)
        .await?;

    let started = Instant::now();
    let tally = run(service.clone(), drill).await?;
    let elapsed = started.elapsed();

    let remaining = service.check_stock(SIM_OPTION, 1).await?.current_stock;
    tracing::info!(
        backend = %config.backend,
        succeeded = tally.succeeded,
        insufficient = tally.insufficient,
        other_failures = tally.other,
        sold = tally.sold,
        remaining,
        elapsed_ms = elapsed.as_millis() as u64,
        "contention drill finished"
    );

    if remaining < 0 || remaining + tally.sold != drill.initial_stock {
        bail!(
            "stock accounting broken: initial {} sold {} remaining {}",
            drill.initial_stock,
            tally.sold,
            remaining
        );
    }
    Ok(())
}
