use ess_registry::core::error::{Conflict, RegistryError};
use ess_registry::core::store::Store;
use ess_registry::registry::libs::{get_lib, save_lib};
use ess_registry::registry::model::{LibWrite, Provenance, ScriptType, ScriptWrite, System};
use ess_registry::registry::scaffold::{
    ScaffoldProtocolRequest, ScaffoldSystemRequest, add_to_workgroup, scaffold_protocol,
    scaffold_system,
};
use ess_registry::registry::scripts::{get_script, get_scripts, save_script};
use ess_registry::registry::systems::create_system;
use tempfile::{TempDir, tempdir};

const COLORMATCH: &str = "# colormatch protocol for mts\n\
namespace eval mts::colormatch {\n\
    proc protocol_init { s } {\n\
\tsource colormatch_stim.tcl\n\
    }\n\
}\n";

fn setup() -> (TempDir, Store, System) {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let sys = create_system(&store, "lab", "mts", "main", "match to sample", "dave").unwrap();
    save(&store, sys.id, "", ScriptType::System, "namespace eval mts {\n}\n");
    save(&store, sys.id, "colormatch", ScriptType::Protocol, COLORMATCH);
    save(&store, sys.id, "colormatch", ScriptType::Stim, "# colormatch stim\nproc stim_on {} {}\n");
    (tmp, store, sys)
}

fn save(store: &Store, system_id: i64, protocol: &str, script_type: ScriptType, content: &str) {
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
        "",
        "",
    )
    .unwrap();
}

fn protocol_request(protocol: &str, from: Option<&str>) -> ScaffoldProtocolRequest {
    ScaffoldProtocolRequest {
        workgroup: "lab".into(),
        system: "mts".into(),
        protocol: protocol.into(),
        from_protocol: from.map(str::to_string),
        created_by: "eve".into(),
        ..Default::default()
    }
}

#[test]
fn clone_protocol_renames_and_records_source() {
    let (_tmp, store, sys) = setup();
    let result = scaffold_protocol(&store, &protocol_request("sizematch", Some("colormatch"))).unwrap();

    assert_eq!(result.scripts_created, 2);
    assert_eq!(result.forked_from, Provenance::protocol("lab", "mts", "colormatch"));
    assert_eq!(result.system.protocols, vec!["colormatch", "sizematch"]);

    let proto = get_script(&store, sys.id, "sizematch", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    assert_eq!(proto.filename, "sizematch.tcl");
    assert!(proto.content.contains("namespace eval mts::sizematch {"));
    assert!(proto.content.contains("source sizematch_stim.tcl"));
    assert!(proto.content.starts_with("# sizematch protocol"));
    assert_eq!(proto.forked_from, Some(Provenance::protocol("lab", "mts", "colormatch")));
    assert_eq!(
        proto.checksum,
        ess_registry::core::checksum::compute_checksum(&proto.content)
    );

    let stim = get_script(&store, sys.id, "sizematch", ScriptType::Stim).unwrap().unwrap();
    assert_eq!(stim.filename, "sizematch_stim.tcl");

    // Source protocol untouched.
    let source = get_script(&store, sys.id, "colormatch", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    assert_eq!(source.content, COLORMATCH);
}

#[test]
fn scaffold_into_existing_protocol_conflicts() {
    let (_tmp, store, sys) = setup();
    save(&store, sys.id, "sizematch", ScriptType::Variants, "# existing\n");
    let before = get_scripts(&store, sys.id).unwrap().len();

    let err = scaffold_protocol(&store, &protocol_request("sizematch", Some("colormatch"))).unwrap_err();
    assert!(matches!(err.conflict(), Some(Conflict::AlreadyExists(_))));
    assert_eq!(get_scripts(&store, sys.id).unwrap().len(), before);
}

#[test]
fn missing_source_protocol_or_system_is_not_found() {
    let (_tmp, store, _sys) = setup();
    let err = scaffold_protocol(&store, &protocol_request("sizematch", Some("nothing"))).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));

    let mut req = protocol_request("sizematch", None);
    req.system = "ghost".into();
    let err = scaffold_protocol(&store, &req).unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[test]
fn skeleton_protocol_seeds_five_scripts() {
    let (_tmp, store, sys) = setup();
    let result = scaffold_protocol(&store, &protocol_request("shapematch", None)).unwrap();
    assert_eq!(result.scripts_created, 5);
    assert_eq!(result.forked_from, Provenance::Skeleton);

    let shapematch: Vec<_> = get_scripts(&store, sys.id)
        .unwrap()
        .into_iter()
        .filter(|s| s.protocol == "shapematch")
        .collect();
    assert_eq!(shapematch.len(), 5);
    assert!(shapematch.iter().all(|s| s.forked_from == Some(Provenance::Skeleton)));
}

#[test]
fn protocol_from_another_system() {
    let (_tmp, store, _sys) = setup();
    let other = create_system(&store, "lab", "planko", "main", "", "dave").unwrap();

    let mut req = protocol_request("colors", Some("colormatch"));
    req.system = "planko".into();
    req.from_system = Some("mts".into());
    let result = scaffold_protocol(&store, &req).unwrap();
    assert_eq!(result.forked_from.to_string(), "lab/mts/colormatch");

    let proto = get_script(&store, other.id, "colors", ScriptType::Protocol).unwrap().unwrap();
    assert!(proto.content.contains("namespace eval planko::colors {"));
}

#[test]
fn invalid_names_are_rejected_before_store_access() {
    let (_tmp, store, _sys) = setup();
    let err = scaffold_protocol(&store, &protocol_request("bad name", None)).unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput(_)));

    let err = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "9lives".into(),
            protocol: Some("p".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInput(_)));
}

#[test]
fn clone_system_across_workgroups_renames_system() {
    let (_tmp, store, _sys) = setup();
    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "otherlab".into(),
            system: "mts2".into(),
            from_system: Some("mts".into()),
            from_workgroup: Some("lab".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(result.system.workgroup, "otherlab");
    assert_eq!(result.system.version, "main");
    assert_eq!(result.system.description, "match to sample");
    assert_eq!(result.forked_from, Provenance::versioned("lab", "mts", "main"));
    assert_eq!(result.system.forked_from, Some(result.forked_from.clone()));
    assert_eq!(result.scripts_created, 3);

    let system_script = get_script(&store, result.system.id, "", ScriptType::System)
        .unwrap()
        .unwrap();
    assert_eq!(system_script.filename, "mts2.tcl");
    assert!(system_script.content.contains("namespace eval mts2 {"));

    let err = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "otherlab".into(),
            system: "mts2".into(),
            protocol: Some("p".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err.conflict(), Some(Conflict::AlreadyExists(_))));
}

#[test]
fn clone_system_can_rename_its_single_protocol() {
    let (_tmp, store, _sys) = setup();
    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "mts_size".into(),
            from_system: Some("mts".into()),
            protocol: Some("sizematch".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(result.system.protocols, vec!["sizematch"]);
    let proto = get_script(&store, result.system.id, "sizematch", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    assert!(proto.content.contains("namespace eval mts_size::sizematch {"));
}

#[test]
fn skeleton_system_has_system_and_protocol_scripts() {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "planko".into(),
            protocol: Some("drop".into()),
            description: "ball drop".into(),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(result.scripts_created, 8);
    assert_eq!(result.system.forked_from, Some(Provenance::Skeleton));
    assert_eq!(result.system.protocols, vec!["drop"]);
    assert_eq!(result.system.script_count, 8);
    assert!(
        get_script(&store, result.system.id, "", ScriptType::Analyze)
            .unwrap()
            .is_some()
    );
}

#[test]
fn template_instantiation_and_add_to_workgroup() {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let template = create_system(&store, "_templates", "mts", "main", "template mts", "admin").unwrap();
    save(&store, template.id, "", ScriptType::System, "namespace eval mts {\n}\n");
    save(&store, template.id, "colormatch", ScriptType::Protocol, COLORMATCH);
    save_lib(
        &store,
        &LibWrite {
            workgroup: "_templates".into(),
            name: "planko_lib".into(),
            version: "main".into(),
            filename: None,
            content: "proc helper {} {}".into(),
        },
        "",
    )
    .unwrap();

    let from_template = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "my_mts".into(),
            template: Some("mts".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(from_template.forked_from.to_string(), "_templates/mts@main");

    let added = add_to_workgroup(&store, "mts", "main", "lab", "eve").unwrap();
    assert_eq!(added.name, "mts");
    assert_eq!(added.workgroup, "lab");
    assert_eq!(added.forked_from, Some(Provenance::versioned("_templates", "mts", "main")));
    let proto = get_script(&store, added.id, "colormatch", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    assert_eq!(proto.content, COLORMATCH);

    let lib = get_lib(&store, "lab", "planko_lib", "main").unwrap().unwrap();
    assert_eq!(lib.content, "proc helper {} {}");
    assert_eq!(lib.forked_from, Some(Provenance::versioned("_templates", "planko_lib", "main")));

    let err = add_to_workgroup(&store, "mts", "main", "lab", "eve").unwrap_err();
    assert!(matches!(err.conflict(), Some(Conflict::AlreadyExists(_))));

    let err = add_to_workgroup(&store, "ghost", "main", "lab", "eve").unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
}

#[test]
fn skeleton_system_without_protocol_gets_default() {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "planko".into(),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(result.system.protocols, vec!["default"]);
    assert_eq!(result.forked_from, Provenance::Skeleton);
}

#[test]
fn template_without_main_resolves_latest_version() {
    let tmp = tempdir().unwrap();
    let store = Store::open_path(&tmp.path().join("registry.db")).unwrap();
    let template = create_system(&store, "_templates", "solo", "v2", "", "admin").unwrap();
    save(&store, template.id, "", ScriptType::System, "namespace eval solo {\n}\n");

    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "solo".into(),
            template: Some("solo".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(result.forked_from, Provenance::versioned("_templates", "solo", "v2"));
    assert_eq!(result.system.version, "main");
    assert_eq!(result.scripts_created, 1);
}

#[test]
fn clone_system_keeps_protocol_filenames() {
    let (_tmp, store, sys) = setup();
    save(&store, sys.id, "mts_color", ScriptType::Protocol, "# mts_color protocol\n");

    let result = scaffold_system(
        &store,
        &ScaffoldSystemRequest {
            workgroup: "lab".into(),
            system: "newsys".into(),
            from_system: Some("mts".into()),
            created_by: "eve".into(),
            ..Default::default()
        },
    )
    .unwrap();

    let proto = get_script(&store, result.system.id, "mts_color", ScriptType::Protocol)
        .unwrap()
        .unwrap();
    assert_eq!(proto.filename, "mts_color.tcl");
    let system_script = get_script(&store, result.system.id, "", ScriptType::System)
        .unwrap()
        .unwrap();
    assert_eq!(system_script.filename, "newsys.tcl");
}
