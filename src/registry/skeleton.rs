//! Built-in Tcl skeletons used when scaffolding without a source.
//!
//! Each skeleton is minimal but loadable: the namespace layout and file
//! names match what cloned systems use, so later clones rename cleanly.

use crate::registry::model::ScriptType;

/// Script types seeded for a new protocol, in creation order.
pub const PROTOCOL_SKELETON_TYPES: [ScriptType; 5] = [
    ScriptType::Protocol,
    ScriptType::Loaders,
    ScriptType::Variants,
    ScriptType::Stim,
    ScriptType::Extract,
];

/// System-level script types seeded for a new system.
pub const SYSTEM_SKELETON_TYPES: [ScriptType; 3] =
    [ScriptType::System, ScriptType::Extract, ScriptType::Analyze];

/// `(type, filename, content)` for every script of a protocol skeleton.
pub fn protocol_scripts(system: &str, protocol: &str, description: &str) -> Vec<(ScriptType, String, String)> {
    let description = if description.is_empty() {
        format!("{} protocol", protocol)
    } else {
        description.to_string()
    };
    PROTOCOL_SKELETON_TYPES
        .iter()
        .map(|t| {
            (
                *t,
                t.default_filename(system, protocol),
                protocol_content(*t, system, protocol, &description),
            )
        })
        .collect()
}

/// System-level scripts for a system skeleton. Protocol scripts are added
/// separately via `protocol_scripts`.
pub fn system_scripts(system: &str, description: &str) -> Vec<(ScriptType, String, String)> {
    let description = if description.is_empty() {
        format!("{} system", system)
    } else {
        description.to_string()
    };
    SYSTEM_SKELETON_TYPES
        .iter()
        .map(|t| {
            (
                *t,
                t.default_filename(system, ""),
                system_content(*t, system, &description),
            )
        })
        .collect()
}

fn header(filename: &str, description: &str) -> String {
    format!(
        "##\n##  NAME\n##    {}\n##\n##  DESCRIPTION\n##    {}\n##\n\n",
        filename, description
    )
}

fn system_content(t: ScriptType, system: &str, description: &str) -> String {
    let head = header(&t.default_filename(system, ""), description);
    match t {
        ScriptType::Extract => format!(
            "{head}namespace eval {system}::extract {{\n    proc trials {{ g }} {{\n\treturn $g\n    }}\n}}\n"
        ),
        ScriptType::Analyze => format!(
            "{head}namespace eval {system}::analyze {{\n    proc summary {{ trials }} {{\n\treturn [dl_llist]\n    }}\n}}\n"
        ),
        _ => format!(
            "{head}package require ess\n\n\
             namespace eval {system} {{\n    proc create {{}} {{\n\
             \tset sys [::ess::create_system [namespace tail [namespace current]]]\n\
             \t$sys add_param start_delay          0      time int\n\
             \t$sys add_param interblock_time   1000      time int\n\
             \t$sys add_param response_timeout 10000      time int\n\n\
             \t$sys set_start start\n\
             \t$sys add_state start {{}} {{ return start_delay }}\n\
             \t$sys add_action start_delay {{\n\t    ::ess::evt_put SYSTEM_STATE RUNNING [now]\n\t    timerTick $start_delay\n\t}}\n\
             \t$sys add_transition start_delay {{\n\t    if {{ [timerExpired] }} {{ return finish }}\n\t}}\n\
             \t$sys add_state finish {{}} {{ return end }}\n\n\
             \treturn $sys\n    }}\n}}\n"
        ),
    }
}

fn protocol_content(t: ScriptType, system: &str, protocol: &str, description: &str) -> String {
    let head = header(&t.default_filename(system, protocol), description);
    let ns = format!("{}::{}", system, protocol);
    match t {
        ScriptType::Protocol => format!(
            "{head}namespace eval {ns} {{\n    proc protocol_init {{ s }} {{\n\
             \t$s set_protocol [namespace tail [namespace current]]\n\
             \tsource [file join [file dirname [info script]] {protocol}_loaders.tcl]\n\
             \tsource [file join [file dirname [info script]] {protocol}_variants.tcl]\n\
             \tsource [file join [file dirname [info script]] {protocol}_stim.tcl]\n    }}\n}}\n"
        ),
        ScriptType::Loaders => format!(
            "{head}namespace eval {ns} {{\n    proc loaders_init {{ s }} {{\n\
             \t$s add_method basic_setup {{ n }} {{\n\t    set g [dg_create]\n\t    dl_set $g:id [dl_fromto 0 $n]\n\t    return $g\n\t}}\n    }}\n}}\n"
        ),
        ScriptType::Variants => format!(
            "{head}namespace eval {ns} {{\n    variable variants {{\n\
             \tsingle {{\n\t    description \"single condition\"\n\t    loader_proc basic_setup\n\t    loader_options {{ n {{ 100 }} }}\n\t}}\n    }}\n}}\n"
        ),
        ScriptType::Stim => format!(
            "{head}# {protocol} stimulus definitions\n\n\
             proc stim_on {{ id }} {{\n    glistSetVisible 1\n    redraw\n}}\n\n\
             proc stim_off {{}} {{\n    glistSetVisible 0\n    redraw\n}}\n"
        ),
        _ => format!(
            "{head}namespace eval {ns}::extract {{\n    proc trials {{ g }} {{\n\treturn $g\n    }}\n}}\n"
        ),
    }
}
