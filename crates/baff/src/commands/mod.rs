use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use baff_cache::{CacheConfig, CacheEvent, CacheServices, EntityStore, EventReceiver};
use baff_core::{ConsumerId, EntityRecord, OwnerId};
use baff_proxy::MemoryProxy;
use tracing::info;

use crate::Command;
use crate::script::{self, Outcome, Step};

pub fn run(command: Command, workdir: &Path, out: &mut impl Write) -> Result<()> {
    let config = CacheConfig::from_workdir(workdir)?;
    match command {
        Command::Check => check(&config, out),
        Command::Replay { fixtures, script } => {
            let services = build_services(&config, &fixtures)?;
            let steps = script::load(&script)?;
            tokio::runtime::Builder::new_current_thread()
                .build()?
                .block_on(replay(&services, steps, out))
        }
    }
}

fn build_services(config: &CacheConfig, fixtures: &Path) -> Result<CacheServices<MemoryProxy>> {
    let registry = config.registry()?;
    let proxy = MemoryProxy::open(fixtures, &registry)?;
    CacheServices::from_config(config, Arc::new(proxy))
}

fn check(config: &CacheConfig, out: &mut impl Write) -> Result<()> {
    let registry = config.registry()?;

    let mut entities: Vec<_> = registry.entities().collect();
    entities.sort_by(|a, b| a.name.cmp(&b.name));
    for entity in entities {
        let role = if entity.is_master_entity() {
            "master".to_owned()
        } else {
            format!("mastered by {}", entity.master_entity_type())
        };
        match &entity.primary_store_type {
            Some(primary) => writeln!(out, "entity {} ({role}, primary store {primary})", entity.name)?,
            None => writeln!(out, "entity {} ({role})", entity.name)?,
        }
    }

    let mut stores: Vec<_> = registry.stores().collect();
    stores.sort_by(|a, b| a.name.cmp(&b.name));
    for store in stores {
        let paging = store
            .page_limit()
            .map_or_else(|| "unbuffered".to_owned(), |limit| format!("page size {limit}"));
        writeln!(out, "store {} holds {} ({paging})", store.name, store.entity_type)?;
    }

    writeln!(out, "cache size {}", config.cache.size)?;
    Ok(())
}

async fn replay(services: &CacheServices<MemoryProxy>, steps: Vec<Step>, out: &mut impl Write) -> Result<()> {
    let mut events = services.subscribe();
    let mut handles: HashMap<String, Arc<EntityStore>> = HashMap::new();
    let total = steps.len();

    for (index, step) in steps.into_iter().enumerate() {
        let outcome = execute(services, &mut handles, step)
            .await
            .with_context(|| format!("step {} of {total} failed", index + 1))?;
        for event in drain(&mut events) {
            writeln!(out, "{}", serde_json::to_string(&event)?)?;
        }
        if let Some(outcome) = outcome {
            writeln!(out, "{}", serde_json::to_string(&outcome)?)?;
        }
    }
    info!(steps = total, stores = services.stores().len(), "Replay finished");
    Ok(())
}

fn handle<'a>(handles: &'a HashMap<String, Arc<EntityStore>>, name: &str) -> Result<&'a Arc<EntityStore>> {
    handles
        .get(name)
        .ok_or_else(|| anyhow!("no store registered under handle '{name}'"))
}

async fn execute(
    services: &CacheServices<MemoryProxy>,
    handles: &mut HashMap<String, Arc<EntityStore>>,
    step: Step,
) -> Result<Option<Outcome>> {
    let outcome = match step {
        Step::GetStore {
            handle,
            store_type,
            owner,
            master,
            consumer,
        } => {
            let owner = owner.map(OwnerId::from);
            let consumer = ConsumerId::from(consumer);
            match services.get_store(&store_type, owner.as_ref(), master.as_deref(), &consumer) {
                Ok(store) => {
                    let store_key = store.store_key().to_owned();
                    handles.insert(handle.clone(), store);
                    Some(Outcome::Store { handle, store_key })
                }
                Err(err) => Some(Outcome::Failed {
                    op: "getStore",
                    error: err.to_string(),
                }),
            }
        }
        Step::Load { handle: name } => {
            let store = handle(handles, &name)?;
            Some(loaded(store, services.load(store).await, "load"))
        }
        Step::LoadNextPage { handle: name } => {
            let store = handle(handles, &name)?;
            Some(loaded(store, services.load_next_page(store).await, "loadNextPage"))
        }
        Step::Detach { handle: name, consumer } => {
            let store = handle(handles, &name)?;
            services.stores().detach_store(store, &ConsumerId::from(consumer));
            None
        }
        Step::Destroy { handle: name } => {
            let store = handles
                .remove(&name)
                .ok_or_else(|| anyhow!("no store registered under handle '{name}'"))?;
            let existed =
                services
                    .stores()
                    .destroy_store(store.store_type(), store.owner_id(), store.master_entity_id());
            Some(Outcome::Destroyed {
                store_key: store.store_key().to_owned(),
                existed,
            })
        }
        Step::Flush { handle: name, invalid } => {
            handle(handles, &name)?.flush(invalid);
            None
        }
        Step::GetVersion { entity_type, entity_id } => {
            let version = services.versions().get_version(&entity_type, &entity_id).await;
            Some(Outcome::Version {
                entity_type,
                entity_id,
                version,
            })
        }
        Step::Refresh {
            entity_type,
            entity_id,
            master,
        } => {
            let master = master
                .map(|payload| decode_master(services, &entity_type, payload))
                .transpose()?;
            services
                .versions()
                .refresh_data(&entity_type, entity_id.as_deref(), master)
                .await;
            None
        }
    };
    Ok(outcome)
}

fn loaded(store: &EntityStore, result: baff_cache::Result<usize>, op: &'static str) -> Outcome {
    match result {
        Ok(_) => Outcome::Loaded {
            store_key: store.store_key().to_owned(),
            records: store.len(),
        },
        Err(err) => Outcome::Failed {
            op,
            error: err.to_string(),
        },
    }
}

fn decode_master(
    services: &CacheServices<MemoryProxy>,
    entity_type: &str,
    payload: serde_json::Value,
) -> Result<EntityRecord> {
    let descriptor = services
        .types()
        .entity(entity_type)
        .ok_or_else(|| anyhow!("unknown entity type {entity_type}"))?;
    EntityRecord::from_value(descriptor, payload).with_context(|| format!("invalid {entity_type} master"))
}

fn drain(events: &mut EventReceiver) -> Vec<CacheEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}
