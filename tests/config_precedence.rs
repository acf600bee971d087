//! Integration tests for settings, value stores, and precedence.
//!
//! Covers memory coercion, the layer order flag > env > instance > global >
//! default, scope isolation, and the store/persistence round-trips.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use minicluster::core::config::persist::{self, Document};
use minicluster::core::config::{
    env_var_name, FlagSet, Layer, MapEnv, Resolver, Scope, SettingContext, SettingRegistry,
    ValueStore,
};
use minicluster::core::value::{memory_mib, Kind};
use minicluster::engine::StartSettings;

// =============================================================================
// Test Fixtures
// =============================================================================

struct Stores {
    _dir: TempDir,
    registry: Arc<SettingRegistry>,
    global: ValueStore,
    instance: ValueStore,
}

impl Stores {
    fn new() -> Self {
        Self::with_global(&Document::new())
    }

    /// Stores whose global file starts out as `document`.
    fn with_global(document: &Document) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let registry = SettingRegistry::builtin();
        let global_path = dir.path().join("config").join("config.json");
        persist::write(&global_path, document).expect("seed global config");
        let global = ValueStore::open(Scope::Global, &global_path, Arc::clone(&registry))
            .expect("open global");
        let instance = ValueStore::open(
            Scope::Instance("minicluster".into()),
            &dir.path().join("machines").join("minicluster.json"),
            Arc::clone(&registry),
        )
        .expect("open instance");
        Self {
            _dir: dir,
            registry,
            global,
            instance,
        }
    }

    fn resolver<'a>(&'a self, flags: &'a FlagSet, env: &'a MapEnv) -> Resolver<'a> {
        Resolver::new(&self.registry, flags, env, Some(&self.instance), &self.global)
    }
}

fn cx() -> SettingContext {
    SettingContext {
        machine_name: "minicluster".into(),
        instance_exists: false,
    }
}

// =============================================================================
// Memory coercion
// =============================================================================

#[test]
fn memory_flag_resolves_as_text_and_coerces_to_mib() {
    let stores = Stores::new();
    let flags = FlagSet::from_pairs([("memory", "2GB")]);
    let env = MapEnv::default();
    let resolver = stores.resolver(&flags, &env);

    assert_eq!(resolver.string("memory").unwrap().as_deref(), Some("2GB"));
    assert_eq!(memory_mib("2GB"), Some(2048));

    let settings = StartSettings::resolve("minicluster", &resolver).unwrap();
    assert_eq!(settings.machine.memory_mib, 2048);
}

#[test]
fn invalid_memory_flag_is_rejected_before_use() {
    let stores = Stores::new();
    let flags = FlagSet::from_pairs([("memory", "two gigs")]);
    let env = MapEnv::default();
    assert!(StartSettings::resolve("minicluster", &stores.resolver(&flags, &env)).is_err());
}

// =============================================================================
// Precedence
// =============================================================================

fn persisted_v() -> Document {
    let mut document = Document::new();
    document.insert("v".into(), serde_json::json!("999"));
    document
}

#[test]
fn flag_beats_env_beats_persisted_beats_default() {
    let stores = Stores::with_global(&persisted_v());
    let env_var = env_var_name("v");

    let flags = FlagSet::from_pairs([("v", "3")]);
    let env = MapEnv::from_pairs([(env_var.as_str(), "2")]);
    let resolver = stores.resolver(&flags, &env);
    assert_eq!(resolver.string("v").unwrap().as_deref(), Some("3"));

    let no_flags = FlagSet::new();
    let resolver = stores.resolver(&no_flags, &env);
    assert_eq!(resolver.string("v").unwrap().as_deref(), Some("2"));

    let no_env = MapEnv::default();
    let resolver = stores.resolver(&no_flags, &no_env);
    assert_eq!(resolver.string("v").unwrap().as_deref(), Some("999"));

    let empty = Stores::new();
    let resolver = empty.resolver(&no_flags, &no_env);
    assert_eq!(resolver.string("v").unwrap().as_deref(), Some("0"));
}

#[test]
fn instance_scope_beats_global_scope() {
    let mut stores = Stores::new();
    stores.global.set("cpus", "2", &cx()).unwrap();
    stores.instance.set("cpus", "6", &cx()).unwrap();

    let flags = FlagSet::new();
    let env = MapEnv::default();
    let resolved = stores
        .resolver(&flags, &env)
        .resolve_with_layer("cpus")
        .unwrap();
    assert_eq!(
        resolved.map(|(value, layer)| (value.to_string(), layer)),
        Some(("6".to_string(), Layer::Instance))
    );
}

#[test]
fn writing_one_scope_leaves_the_other_alone() {
    let mut stores = Stores::new();
    stores.instance.set("memory", "4GB", &cx()).unwrap();
    assert!(!stores.global.contains("memory"));

    stores.global.set("memory", "3GB", &cx()).unwrap();
    stores.instance.reload().unwrap();
    assert_eq!(stores.instance.get("memory").unwrap().to_string(), "4GB");
}

#[test]
fn invalid_env_value_is_an_error() {
    let stores = Stores::new();
    let flags = FlagSet::new();
    let var = env_var_name("cpus");
    let env = MapEnv::from_pairs([(var.as_str(), "many")]);
    assert!(stores.resolver(&flags, &env).resolve("cpus").is_err());
}

#[test]
fn unknown_setting_cannot_be_set() {
    let mut stores = Stores::new();
    assert!(stores.global.set("no-such-setting", "x", &cx()).is_err());
}

#[test]
fn defaults_are_never_written() {
    let stores = Stores::new();
    let flags = FlagSet::new();
    let env = MapEnv::default();
    StartSettings::resolve("minicluster", &stores.resolver(&flags, &env)).unwrap();

    let on_disk = persist::read(stores.global.path()).unwrap();
    assert!(on_disk.is_empty());
}

// =============================================================================
// Properties
// =============================================================================

fn raw_for(kind: Kind) -> BoxedStrategy<String> {
    match kind {
        Kind::Int => (1i64..10_000).prop_map(|n| n.to_string()).boxed(),
        Kind::Bool => prop::sample::select(vec!["true", "false", "yes", "no", "1", "0"])
            .prop_map(str::to_string)
            .boxed(),
        Kind::StringList => prop::collection::vec("[a-z0-9.]{1,8}", 0..4)
            .prop_map(|items| items.join(","))
            .boxed(),
        Kind::String => "[a-z0-9]{1,12}".boxed(),
    }
}

fn kind_and_raw() -> impl Strategy<Value = (Kind, String)> {
    prop::sample::select(vec![Kind::Int, Kind::Bool, Kind::StringList, Kind::String])
        .prop_flat_map(|kind| (Just(kind), raw_for(kind)))
}

fn set_then_get(dir: &Path, kind: Kind, raw: &str) -> Result<(), TestCaseError> {
    let registry = SettingRegistry::builtin();
    let mut store = ValueStore::open(
        Scope::Global,
        &dir.join("config.json"),
        Arc::clone(&registry),
    )
    .expect("open store");

    for setting in registry.iter().filter(|s| s.kind == kind) {
        if setting.validate(raw).is_err() {
            continue;
        }
        store
            .set(&setting.name, raw, &cx())
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
        let expected = kind.coerce(raw).expect("valid for kind");
        prop_assert_eq!(store.get(&setting.name), Some(&expected));
    }
    Ok(())
}

fn leaf_json() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i32>().prop_map(serde_json::Value::from),
        "[ -~]{0,16}".prop_map(serde_json::Value::from),
        prop::collection::vec("[a-z]{0,6}", 0..4).prop_map(serde_json::Value::from),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A value accepted by `set` reads back as its coercion.
    #[test]
    fn set_then_get_returns_coerced_value((kind, raw) in kind_and_raw()) {
        let dir = TempDir::new().expect("temp dir");
        set_then_get(dir.path(), kind, &raw)?;
    }

    /// With no flag and nothing persisted, an env override wins.
    #[test]
    fn env_override_alone_is_returned(value in 1i64..100_000, flag in any::<bool>()) {
        let stores = Stores::new();
        let flags = FlagSet::new();
        let bool_raw = if flag { "true" } else { "false" };

        for setting in stores.registry.iter() {
            if !stores.registry.is_env_observable(&setting.name) {
                continue;
            }
            let raw = match setting.kind {
                Kind::Int => value.to_string(),
                Kind::Bool => bool_raw.to_string(),
                Kind::StringList => format!("a{},b", value),
                Kind::String => format!("s{}", value),
            };
            let var = env_var_name(&setting.name);
            let env = MapEnv::from_pairs([(var.as_str(), raw.as_str())]);
            let resolved = stores.resolver(&flags, &env).resolve_with_layer(&setting.name).unwrap();
            prop_assert_eq!(
                resolved,
                Some((setting.kind.coerce(&raw).unwrap(), Layer::Env))
            );
        }
    }

    /// Persisted documents read back unchanged.
    #[test]
    fn write_then_read_preserves_document(
        entries in prop::collection::btree_map("[a-z][a-z-]{0,11}", leaf_json(), 0..8)
    ) {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("config.json");
        let document: BTreeMap<String, serde_json::Value> = entries;
        persist::write(&path, &document).unwrap();
        prop_assert_eq!(persist::read(&path).unwrap(), document);
    }
}
