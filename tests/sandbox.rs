use ess_registry::core::checksum::compute_checksum;
use ess_registry::core::error::{Conflict, RegistryError};
use ess_registry::core::store::Store;
use ess_registry::registry::model::{Provenance, ScriptType, ScriptWrite, System};
use ess_registry::registry::sandbox::{
    create_sandbox, delete_sandbox, list_versions, promote_sandbox, sync_sandbox,
};
use ess_registry::registry::scripts::{get_script, get_script_history, get_scripts, save_script};
use ess_registry::registry::systems::{create_system, get_system};
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Store, System) {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let main = create_system(&store, "lab", "mts", "main", "match to sample", "dave").unwrap();
    for (protocol, script_type, content) in [
        ("", ScriptType::System, "system v1"),
        ("colormatch", ScriptType::Protocol, "colormatch v1"),
        ("colormatch", ScriptType::Stim, "stim v1"),
    ] {
        save(&store, main.id, protocol, script_type, content);
    }
    (tmp, store, main)
}

fn save(store: &Store, system_id: i64, protocol: &str, script_type: ScriptType, content: &str) {
    let expected = get_script(store, system_id, protocol, script_type)
        .unwrap()
        .map(|s| s.checksum)
        .unwrap_or_default();
    save_script(
        store,
        &ScriptWrite {
            system_id,
            protocol: protocol.to_string(),
            script_type,
            filename: None,
            content: content.to_string(),
            updated_by: "dave".to_string(),
        },
        &expected,
        "",
    )
    .unwrap();
}

fn content(store: &Store, system_id: i64, protocol: &str, script_type: ScriptType) -> Option<String> {
    get_script(store, system_id, protocol, script_type)
        .unwrap()
        .map(|s| s.content)
}

#[test]
fn create_then_versions_lists_main_and_sandbox() {
    let (_tmp, store, _main) = setup();
    create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    let versions: Vec<String> = list_versions(&store, "lab", "mts")
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec!["main", "dave-dev"]);
}

#[test]
fn create_copies_scripts_and_records_provenance() {
    let (_tmp, store, main) = setup();
    let sandbox =
        create_sandbox(&store, "lab", "mts", "", "dave-dev", "dave", Some("color tweaks")).unwrap();

    assert_eq!(sandbox.version, "dave-dev");
    assert_eq!(sandbox.description, "Sandbox: color tweaks");
    assert_eq!(
        sandbox.forked_from,
        Some(Provenance::versioned("lab", "mts", "main"))
    );
    assert!(sandbox.forked_at.is_some());
    assert_eq!(sandbox.script_count, 3);

    let ours: Vec<(String, String)> = get_scripts(&store, sandbox.id)
        .unwrap()
        .into_iter()
        .map(|s| (s.key().to_string(), s.checksum))
        .collect();
    let theirs: Vec<(String, String)> = get_scripts(&store, main.id)
        .unwrap()
        .into_iter()
        .map(|s| (s.key().to_string(), s.checksum))
        .collect();
    assert_eq!(ours, theirs);

    let versions = list_versions(&store, "lab", "mts").unwrap();
    assert!(versions[0].is_main);
    assert_eq!(versions[1].description, "Sandbox: color tweaks");
}

#[test]
fn duplicate_label_and_missing_base_fail() {
    let (_tmp, store, _main) = setup();
    create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    let err = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "eve", None).unwrap_err();
    assert!(matches!(err.conflict(), Some(Conflict::AlreadyExists(_))));

    let err = create_sandbox(&store, "lab", "nope", "main", "x", "eve", None).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));

    let err = create_sandbox(&store, "lab", "mts", "main", "main", "eve", None).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput(_)));
}

#[test]
fn promote_overwrites_base_key_by_key() {
    let (_tmp, store, main) = setup();
    let sb = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    save(&store, sb.id, "colormatch", ScriptType::Protocol, "colormatch v2");
    save(&store, sb.id, "colormatch", ScriptType::Variants, "variants new");

    let report = promote_sandbox(&store, "lab", "mts", "dave-dev", None, "dave").unwrap();
    assert_eq!(report.to_version, "main");
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);
    assert_eq!(report.unchanged, 2);

    assert_eq!(
        content(&store, main.id, "colormatch", ScriptType::Protocol).as_deref(),
        Some("colormatch v2")
    );
    assert_eq!(
        content(&store, main.id, "colormatch", ScriptType::Variants).as_deref(),
        Some("variants new")
    );

    let promoted = get_script(&store, main.id, "colormatch", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    let history = get_script_history(&store, promoted.id, 1).unwrap();
    assert_eq!(history[0].comment, "promoted from dave-dev");

    // Sandbox survives promotion.
    assert!(get_system(&store, "lab", "mts", "dave-dev").unwrap().is_some());
}

#[test]
fn unchanged_keys_get_no_history_on_promote() {
    let (_tmp, store, main) = setup();
    create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();
    let system_script = get_script(&store, main.id, "", ScriptType::System).unwrap().unwrap();
    let before = get_script_history(&store, system_script.id, 0).unwrap().len();

    let report = promote_sandbox(&store, "lab", "mts", "dave-dev", None, "dave").unwrap();
    assert_eq!(report.unchanged, 3);
    assert_eq!(report.created + report.updated, 0);
    assert_eq!(get_script_history(&store, system_script.id, 0).unwrap().len(), before);
}

#[test]
fn destination_only_keys_survive_promote_and_sync() {
    let (_tmp, store, main) = setup();
    let sb = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    save(&store, main.id, "sizematch", ScriptType::Protocol, "main only");
    promote_sandbox(&store, "lab", "mts", "dave-dev", None, "dave").unwrap();
    assert_eq!(
        content(&store, main.id, "sizematch", ScriptType::Protocol).as_deref(),
        Some("main only")
    );

    save(&store, sb.id, "shapematch", ScriptType::Protocol, "sandbox only");
    sync_sandbox(&store, "lab", "mts", "dave-dev", "dave").unwrap();
    assert_eq!(
        content(&store, sb.id, "shapematch", ScriptType::Protocol).as_deref(),
        Some("sandbox only")
    );
    assert!(get_script(&store, main.id, "shapematch", ScriptType::Protocol)
        .unwrap()
        .is_none());
}

#[test]
fn sync_pulls_base_changes_and_is_lossy_for_sandbox_edits() {
    let (_tmp, store, main) = setup();
    let sb = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    save(&store, sb.id, "colormatch", ScriptType::Stim, "sandbox stim");
    save(&store, main.id, "colormatch", ScriptType::Stim, "upstream stim");
    save(&store, main.id, "sizematch", ScriptType::Loaders, "new upstream");

    let report = sync_sandbox(&store, "lab", "mts", "dave-dev", "eve").unwrap();
    assert_eq!(report.from_version, "main");
    assert_eq!(report.created, 1);
    assert_eq!(report.updated, 1);

    assert_eq!(
        content(&store, sb.id, "colormatch", ScriptType::Stim).as_deref(),
        Some("upstream stim")
    );
    let loaders = get_script(&store, sb.id, "sizematch", ScriptType::Loaders)
        .unwrap()
        .unwrap();
    assert_eq!(loaders.checksum, compute_checksum("new upstream"));
    assert_eq!(loaders.updated_by, "eve");
}

#[test]
fn promote_to_explicit_new_target_creates_it() {
    let (_tmp, store, _main) = setup();
    create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();

    let report =
        promote_sandbox(&store, "lab", "mts", "dave-dev", Some("release"), "dave").unwrap();
    assert_eq!(report.to_version, "release");
    assert_eq!(report.created, 3);

    let release = get_system(&store, "lab", "mts", "release").unwrap().unwrap();
    assert_eq!(release.script_count, 3);
}

#[test]
fn nested_sandbox_promotes_to_its_own_base() {
    let (_tmp, store, main) = setup();
    create_sandbox(&store, "lab", "mts", "main", "team", "dave", None).unwrap();
    let nested = create_sandbox(&store, "lab", "mts", "team", "dave-dev", "dave", None).unwrap();
    save(&store, nested.id, "", ScriptType::System, "system v2");

    let report = promote_sandbox(&store, "lab", "mts", "dave-dev", None, "dave").unwrap();
    assert_eq!(report.to_version, "team");
    assert_eq!(
        content(&store, main.id, "", ScriptType::System).as_deref(),
        Some("system v1")
    );
}

#[test]
fn delete_removes_sandbox_but_protects_main() {
    let (_tmp, store, _main) = setup();
    let sb = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();
    let stim = get_script(&store, sb.id, "colormatch", ScriptType::Stim).unwrap().unwrap();

    let err = delete_sandbox(&store, "lab", "mts", "main", "dave").unwrap_err();
    assert!(matches!(err.conflict(), Some(Conflict::ProtectedVersion(_))));

    delete_sandbox(&store, "lab", "mts", "dave-dev", "dave").unwrap();
    assert!(get_system(&store, "lab", "mts", "dave-dev").unwrap().is_none());
    assert!(get_scripts(&store, sb.id).unwrap().is_empty());
    // History outlives the deleted script.
    assert!(!get_script_history(&store, stim.id, 0).unwrap().is_empty());

    let err = delete_sandbox(&store, "lab", "mts", "dave-dev", "dave").unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));

    let versions: Vec<String> = list_versions(&store, "lab", "mts")
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec!["main"]);
}

#[test]
fn main_cannot_be_promoted_or_synced() {
    let (_tmp, store, _main) = setup();
    assert!(matches!(
        promote_sandbox(&store, "lab", "mts", "main", None, "dave").unwrap_err(),
        RegistryError::InvalidInput(_)
    ));
    assert!(matches!(
        sync_sandbox(&store, "lab", "mts", "main", "dave").unwrap_err(),
        RegistryError::InvalidInput(_)
    ));
}

#[test]
fn latest_alias_never_reaches_main() {
    let (_tmp, store, main) = setup();
    for alias in ["latest", ""] {
        assert!(matches!(
            delete_sandbox(&store, "lab", "mts", alias, "dave").unwrap_err(),
            RegistryError::InvalidInput(_)
        ));
        assert!(matches!(
            promote_sandbox(&store, "lab", "mts", alias, None, "dave").unwrap_err(),
            RegistryError::InvalidInput(_)
        ));
        assert!(matches!(
            sync_sandbox(&store, "lab", "mts", alias, "dave").unwrap_err(),
            RegistryError::InvalidInput(_)
        ));
    }
    let survivor = get_system(&store, "lab", "mts", "main").unwrap().unwrap();
    assert_eq!(survivor.id, main.id);
    assert_eq!(get_scripts(&store, main.id).unwrap().len(), 3);
}

#[test]
fn latest_tracks_the_most_recent_write() {
    let (_tmp, store, main) = setup();
    let sb = create_sandbox(&store, "lab", "mts", "main", "dave-dev", "dave", None).unwrap();
    let latest = get_system(&store, "lab", "mts", "latest").unwrap().unwrap();
    assert_eq!(latest.id, sb.id);

    save(&store, main.id, "colormatch", ScriptType::Stim, "stim v2");
    let latest = get_system(&store, "lab", "mts", "latest").unwrap().unwrap();
    assert_eq!(latest.id, main.id);
}
