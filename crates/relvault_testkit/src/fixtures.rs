//! Sample schema, commands and store helpers.
//!
//! The sample model has two entities:
//!
//! - `Company { id, name (unique) }` with reverse relation `employees`
//! - `Person { id, name (unique), address?, age? }` with relations
//!   `employer` (zero or one `Company`) and `friends` (many `Person`), and
//!   reverse relation `friend_of`

use relvault_core::{
    Cardinality, CommandRegistry, CoreError, CoreResult, DataType, EntitySpec, Instance,
    InstanceId, Params, Schema, Store, StoreConfig, Value, WriteContext,
};
use relvault_storage::{
    FileSnapshotLog, FileTransactionLog, MemorySnapshotLog, MemoryTransactionLog, SnapshotLog,
    TransactionLog,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Name the test stores are opened under.
pub const STORE_NAME: &str = "sample";

/// Builds the sample schema.
pub fn sample_schema() -> Schema {
    Schema::builder()
        .entity(
            EntitySpec::new("Company")
                .identity("id")
                .attribute("name", DataType::Text)
                .unique("name")
                .reverse("employees", "Person", "employer"),
        )
        .entity(
            EntitySpec::new("Person")
                .identity("id")
                .attribute("name", DataType::Text)
                .nullable("address", DataType::Text)
                .nullable("age", DataType::Integer)
                .unique("name")
                .relation("employer", "Company", Cardinality::ZeroOrOne)
                .relation("friends", "Person", Cardinality::Many)
                .reverse("friend_of", "Person", "friends"),
        )
        .build()
        .expect("sample schema is valid")
}

/// Parameters of `create_person` with only a name.
pub fn person(name: &str) -> Params {
    Params::new().with("name", name)
}

/// Parameters of `create_company`.
pub fn company(name: &str) -> Params {
    Params::new().with("name", name)
}

/// Parameters addressing one instance by id.
pub fn id(id: u64) -> Params {
    Params::new().with("id", id_value(id))
}

fn id_value(id: u64) -> Value {
    i64::try_from(id).map(Value::Integer).unwrap_or(Value::Null)
}

fn instance_value(instance: Instance) -> Value {
    id_value(instance.id().as_u64())
}

fn handle(ctx: &WriteContext<'_>, entity: &str, id: InstanceId) -> CoreResult<Instance> {
    Ok(Instance::new(ctx.schema().resolve_entity(entity)?.id(), id))
}

fn optional_handle(
    ctx: &WriteContext<'_>,
    params: &Params,
    name: &str,
    entity: &str,
) -> CoreResult<Option<Instance>> {
    match params.get(name).filter(|v| !v.is_null()) {
        Some(_) => handle(ctx, entity, params.id(name)?).map(Some),
        None => Ok(None),
    }
}

/// Builds the commands of the sample model.
///
/// | command | params | result |
/// |---|---|---|
/// | `create_company` | `name` | id |
/// | `create_person` | `name`, `address?`, `age?`, `employer?` | id |
/// | `create_people` | `names` (array of text) | array of ids |
/// | `update_address` | `id`, `address?` | null |
/// | `rename_person` | `id`, `name` | null |
/// | `delete_person` | `id` | null |
/// | `delete_company` | `id` | null |
/// | `befriend` | `id`, `friend` | whether the edge is new |
/// | `hire` | `id`, `company?` | null |
/// | `fail` | `message` | always fails |
/// | `abandon_person` | `name` | leaves a builder unfinished |
pub fn sample_commands() -> CommandRegistry {
    let mut commands = CommandRegistry::new();
    register_all(&mut commands).expect("sample commands are valid");
    commands
}

fn register_all(commands: &mut CommandRegistry) -> CoreResult<()> {
    commands.register_fn("create_company", |ctx, params| {
        let company = ctx
            .create("Company")?
            .set("name", params.text("name")?)
            .insert()?;
        Ok(instance_value(company))
    })?;

    commands.register_fn("create_person", |ctx, params| {
        let employer = optional_handle(ctx, params, "employer", "Company")?;
        let mut builder = ctx
            .create("Person")?
            .set("name", params.text("name")?)
            .set("address", params.optional_text("address")?)
            .set("age", params.optional_integer("age")?);
        if let Some(company) = employer {
            builder = builder.relate("employer", company);
        }
        Ok(instance_value(builder.insert()?))
    })?;

    commands.register_fn("create_people", |ctx, params| {
        let names = params
            .value("names")?
            .as_array()
            .ok_or_else(|| CoreError::type_mismatch("names must be an array"))?
            .to_vec();
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let name = name
                .as_text()
                .ok_or_else(|| CoreError::type_mismatch("names must be text"))?
                .to_string();
            let person = ctx.create("Person")?.set("name", name).insert()?;
            ids.push(instance_value(person));
        }
        Ok(Value::Array(ids))
    })?;

    commands.register_fn("update_address", |ctx, params| {
        let person = handle(ctx, "Person", params.id("id")?)?;
        ctx.update(person)?
            .set("address", params.optional_text("address")?)
            .apply()?;
        Ok(Value::Null)
    })?;

    commands.register_fn("rename_person", |ctx, params| {
        let person = handle(ctx, "Person", params.id("id")?)?;
        ctx.update(person)?.set("name", params.text("name")?).apply()?;
        Ok(Value::Null)
    })?;

    commands.register_fn("delete_person", |ctx, params| {
        let person = handle(ctx, "Person", params.id("id")?)?;
        ctx.delete(person)?;
        Ok(Value::Null)
    })?;

    commands.register_fn("delete_company", |ctx, params| {
        let company = handle(ctx, "Company", params.id("id")?)?;
        ctx.delete(company)?;
        Ok(Value::Null)
    })?;

    commands.register_fn("befriend", |ctx, params| {
        let person = handle(ctx, "Person", params.id("id")?)?;
        let friend = handle(ctx, "Person", params.id("friend")?)?;
        Ok(Value::Bool(ctx.add_related(person, "friends", friend)?))
    })?;

    commands.register_fn("hire", |ctx, params| {
        let person = handle(ctx, "Person", params.id("id")?)?;
        let company = optional_handle(ctx, params, "company", "Company")?;
        ctx.set_related(person, "employer", company)?;
        Ok(Value::Null)
    })?;

    commands.register_fn("fail", |_, params| {
        Err(CoreError::command(
            params.optional_text("message")?.unwrap_or("refused"),
        ))
    })?;

    commands.register_fn("abandon_person", |ctx, params| {
        let _ = ctx.create("Person")?.set("name", params.text("name")?);
        Ok(Value::Null)
    })?;

    Ok(())
}

enum Providers {
    Memory {
        log: MemoryTransactionLog,
        snapshots: MemorySnapshotLog,
    },
    File {
        dir: TempDir,
    },
}

impl Providers {
    fn connect(&self) -> (Arc<dyn TransactionLog>, Arc<dyn SnapshotLog>) {
        match self {
            Self::Memory { log, snapshots } => {
                let log: Arc<dyn TransactionLog> = Arc::new(log.connect());
                let snapshots: Arc<dyn SnapshotLog> = Arc::new(snapshots.clone());
                (log, snapshots)
            }
            Self::File { dir } => {
                let log: Arc<dyn TransactionLog> = Arc::new(
                    FileTransactionLog::open(&dir.path().join("log"))
                        .expect("Failed to open transaction log"),
                );
                let snapshots: Arc<dyn SnapshotLog> = Arc::new(
                    FileSnapshotLog::open(&dir.path().join("snapshots"))
                        .expect("Failed to open snapshot log"),
                );
                (log, snapshots)
            }
        }
    }
}

/// A store over test providers that outlive it.
///
/// [`reopen`](Self::reopen) closes the store and opens a fresh one over
/// the same log and snapshots; [`open_handle`](Self::open_handle) opens a
/// second, concurrent handle as another process would.
pub struct TestStore {
    /// The open store.
    pub store: Store,
    providers: Providers,
    config: StoreConfig,
}

impl TestStore {
    /// Opens the sample model over in-memory providers.
    pub fn memory() -> Self {
        Self::memory_with(StoreConfig::default())
    }

    /// Opens the sample model over in-memory providers with `config`.
    pub fn memory_with(config: StoreConfig) -> Self {
        Self::open(
            Providers::Memory {
                log: MemoryTransactionLog::new(),
                snapshots: MemorySnapshotLog::new(),
            },
            config,
        )
    }

    /// Opens the sample model over file providers in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(StoreConfig::default())
    }

    /// Opens the sample model over file providers with `config`.
    pub fn file_with(config: StoreConfig) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        Self::open(Providers::File { dir }, config)
    }

    fn open(providers: Providers, config: StoreConfig) -> Self {
        let store = open_store(&providers, sample_schema(), sample_commands(), config.clone())
            .expect("Failed to open test store");
        Self {
            store,
            providers,
            config,
        }
    }

    /// Returns the directory of file providers, `None` for memory ones.
    pub fn path(&self) -> Option<&Path> {
        match &self.providers {
            Providers::Memory { .. } => None,
            Providers::File { dir } => Some(dir.path()),
        }
    }

    /// Opens another handle on the same providers with any schema and commands.
    ///
    /// # Errors
    ///
    /// Returns whatever [`StoreBuilder::open`](relvault_core::StoreBuilder::open) returns.
    pub fn open_handle(&self, schema: Schema, commands: CommandRegistry) -> CoreResult<Store> {
        open_store(&self.providers, schema, commands, self.config.clone())
    }

    /// Opens another handle on the sample model.
    pub fn second_handle(&self) -> Store {
        self.open_handle(sample_schema(), sample_commands())
            .expect("Failed to open second handle")
    }

    /// Closes the store and opens it again over the same providers.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            providers,
            config,
        } = self;
        store.close().expect("Failed to close test store");
        drop(store);
        tracing::debug!("reopening test store");
        Self::open(providers, config)
    }

    /// Committed snapshot ids, ascending.
    pub fn snapshot_ids(&self) -> Vec<u64> {
        let (_, snapshots) = self.providers.connect();
        snapshots.list().expect("Failed to list snapshots")
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

fn open_store(
    providers: &Providers,
    schema: Schema,
    commands: CommandRegistry,
    config: StoreConfig,
) -> CoreResult<Store> {
    let (log, snapshots) = providers.connect();
    Store::builder(STORE_NAME, schema)
        .commands(commands)
        .transaction_log(log)
        .snapshot_log(snapshots)
        .config(config)
        .open()
}

/// Runs a test against a fresh in-memory sample store.
///
/// # Example
///
/// ```rust
/// use relvault_testkit::{person, with_sample_store};
///
/// with_sample_store(|store| {
///     store.execute("create_person", person("Ann")).unwrap();
///     assert_eq!(store.read(|ctx| ctx.count("Person")).unwrap(), 1);
/// });
/// ```
pub fn with_sample_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory();
    f(&test_store.store)
}

/// Renders every live instance with all its attributes and relations,
/// one line each, in entity then id order. Stores in the same state
/// render identically.
pub fn dump(store: &Store) -> Vec<String> {
    store
        .read(|ctx| {
            let schema = ctx.schema();
            let mut rows = Vec::new();
            for entity in schema.entities() {
                for instance in ctx.list(entity.name())? {
                    let mut row = format!("{}:{}", entity.name(), instance.id());
                    for attribute in entity.attributes() {
                        let value = ctx.attribute(instance, &attribute.name)?;
                        row.push_str(&format!(" {}={value}", attribute.name));
                    }
                    for relation in entity.relations() {
                        let Some(relation) = schema.relation(*relation) else {
                            continue;
                        };
                        let heads: Vec<String> = ctx
                            .related_many(instance, &relation.name)?
                            .iter()
                            .map(|head| head.id().to_string())
                            .collect();
                        row.push_str(&format!(" {}=[{}]", relation.name, heads.join(",")));
                    }
                    rows.push(row);
                }
            }
            Ok(rows)
        })
        .expect("Failed to read store")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_schema_resolves() {
        let schema = sample_schema();
        let person = schema.resolve_entity("Person").unwrap();
        assert_eq!(person.unique(), ["name"]);
        assert!(schema.resolve_entity("Company").is_ok());
    }

    #[test]
    fn sample_commands_are_registered() {
        let commands = sample_commands();
        assert!(commands.contains("create_person"));
        assert!(commands.contains("abandon_person"));
        assert_eq!(commands.len(), 11);
    }

    #[test]
    fn memory_store_reopens() {
        let store = TestStore::memory();
        store.execute("create_company", company("Acme")).unwrap();
        let store = store.reopen();
        assert_eq!(store.read(|ctx| ctx.count("Company")).unwrap(), 1);
        assert!(store.path().is_none());
    }
}
