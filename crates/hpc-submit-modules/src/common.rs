//! Helpers shared by several modules.

use hpc_submit_core::manifest::ManifestRecord;

/// Move files with `extensions` from the scratch directory to the output
/// directory, reporting each one.
pub fn emit_scratch_retrieval(out: &mut String, extensions: &[&str]) {
    if extensions.is_empty() {
        return;
    }
    out.push_str("printf \"\\n\"\n");
    out.push_str(&format!("for ext in {}; do\n", extensions.join(" ")));
    out.push_str("    while IFS= read -r -d '' file; do\n");
    out.push_str("        filename=$(basename \"$file\")\n");
    out.push_str("        if mv \"$file\" \"${output_directory}$filename\"; then\n");
    out.push_str("            printf \"Retrieved: %s\\n\" \"$filename\"\n");
    out.push_str("        else\n");
    out.push_str("            printf \"Warning: Failed to retrieve %s\\n\" \"$filename\"\n");
    out.push_str("        fi\n");
    out.push_str("    done < <(find \"$scratch_directory\" -maxdepth 1 -type f \\\n");
    out.push_str("        -name \"*$ext\" -print0)\n");
    out.push_str("done\n");
}

/// Quote `arg` as one shell word.
pub fn shell_word(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:=/+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Fields of a user manifest record. Tab-separated records keep their
/// empty fields; a record without tabs is split on whitespace.
pub fn record_fields(record: &ManifestRecord) -> Vec<String> {
    match record.fields.as_slice() {
        [only] => only.split_whitespace().map(str::to_string).collect(),
        fields => fields.to_vec(),
    }
}

/// `base="$(basename "$path")"; base="${base%.*}"`.
pub fn emit_base_name(out: &mut String, var: &str, path_var: &str) {
    out.push_str(&format!(
        "{var}=$(basename \"${path_var}\"); {var}=\"${{{var}%.*}}\"\n"
    ));
}
