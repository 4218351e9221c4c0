use std::collections::BTreeSet;
use std::path::Path;

use json::JsonValue;

use crate::{
    coupling::{CouplingConfig, NodeSelector},
    datatypes::ElementKind,
    encoding::EncodingResolver,
    error::GeoanchorError,
    head_selector::ToleranceSchedule,
    model::StagePolicy,
    parser::ParseOptions,
};

/// Everything a pipeline run needs besides the model file
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub parse: ParseOptions,
    pub stage_policy: StagePolicy,
    pub coupling: CouplingConfig,
}

/// Loads and validates a run configuration file
///
/// # Arguments
/// * `path` - Path to the JSON run file
///
/// # Returns
/// A validated RunConfig
pub fn load(path: &Path) -> Result<RunConfig, GeoanchorError> {
    let text = match std::fs::read_to_string(path) {
        Ok(f) => f,
        Err(_err) => {
            return Err(GeoanchorError::Input(format!(
                "Unable to open config file {}",
                path.display()
            )))
        }
    };
    parse_config(&text)
}

/// Parses a run configuration from JSON text
pub fn parse_config(text: &str) -> Result<RunConfig, GeoanchorError> {
    let root = match json::parse(text) {
        Ok(f) => f,
        Err(err) => {
            return Err(GeoanchorError::Config(format!(
                "Error in config json: {err}"
            )))
        }
    };

    if !root.has_key("anchors") {
        return Err(GeoanchorError::Config(
            "Config json missing anchors field".to_string(),
        ));
    }
    if !root["anchors"].has_key("material") {
        return Err(GeoanchorError::Config(
            "Config json missing material field in anchors section".to_string(),
        ));
    }
    if !root["anchors"].has_key("tolerances") {
        return Err(GeoanchorError::Config(
            "Config json missing tolerances field in anchors section".to_string(),
        ));
    }

    Ok(RunConfig {
        parse: parse_options(&root["parse"])?,
        stage_policy: stage_policy(&root["stages"])?,
        coupling: coupling_config(&root["anchors"])?,
    })
}

fn parse_options(section: &JsonValue) -> Result<ParseOptions, GeoanchorError> {
    let mut options = ParseOptions::default();
    if section.is_null() {
        return Ok(options);
    }

    if section.has_key("progress_interval") {
        match section["progress_interval"].as_usize() {
            Some(interval) if interval > 0 => options.progress_interval = interval,
            _ => {
                return Err(GeoanchorError::Config(
                    "parse.progress_interval must be a positive integer".to_string(),
                ))
            }
        }
    }
    if section.has_key("normalize_coordinates") {
        options.normalize_coordinates = boolean(section, "normalize_coordinates", "parse")?;
    }
    if section.has_key("encodings") {
        let labels = strings(&section["encodings"], "parse.encodings")?;
        options.encodings = EncodingResolver::from_labels(&labels)?;
    }

    Ok(options)
}

fn stage_policy(section: &JsonValue) -> Result<StagePolicy, GeoanchorError> {
    if section.is_null() || !section.has_key("strict") {
        return Ok(StagePolicy::Warn);
    }
    if boolean(section, "strict", "stages")? {
        Ok(StagePolicy::Fatal)
    } else {
        Ok(StagePolicy::Warn)
    }
}

fn coupling_config(section: &JsonValue) -> Result<CouplingConfig, GeoanchorError> {
    let material = match section["material"].as_u32() {
        Some(m) => m,
        None => {
            return Err(GeoanchorError::Config(
                "anchors.material must be a non-negative integer id".to_string(),
            ))
        }
    };
    let tolerances = ToleranceSchedule::new(numbers(&section["tolerances"], "anchors.tolerances")?)?;

    let mut config = CouplingConfig::new(material, tolerances);

    if section.has_key("nearest_k") {
        match section["nearest_k"].as_usize() {
            Some(k) if k >= 1 => config.nearest_k = k,
            _ => {
                return Err(GeoanchorError::Config(
                    "anchors.nearest_k must be an integer of at least 1".to_string(),
                ))
            }
        }
    }
    if section.has_key("search_radius") {
        match section["search_radius"].as_f64() {
            Some(r) if r.is_finite() && r > 0.0 => config.search_radius = r,
            _ => {
                return Err(GeoanchorError::Config(
                    "anchors.search_radius must be a positive number".to_string(),
                ))
            }
        }
    }
    if section.has_key("surface") {
        config.surface = node_selector(&section["surface"], "anchors.surface")?;
    }
    if section.has_key("volume") {
        config.volume = node_selector(&section["volume"], "anchors.volume")?;
    }
    if section.has_key("bonded_mesh_sets") {
        config.bonded_mesh_sets = ids(&section["bonded_mesh_sets"], "anchors.bonded_mesh_sets")?;
    }
    if section.has_key("free_mesh_sets") {
        config.free_mesh_sets = ids(&section["free_mesh_sets"], "anchors.free_mesh_sets")?;
    }
    if section.has_key("interior_fallback") {
        config.interior_fallback = boolean(section, "interior_fallback", "anchors")?;
    }

    Ok(config)
}

fn node_selector(section: &JsonValue, path: &str) -> Result<NodeSelector, GeoanchorError> {
    if !section.has_key("kind") {
        return Err(GeoanchorError::Config(format!(
            "Config json missing kind field in {path} section"
        )));
    }
    let kind = match section["kind"].as_str().and_then(ElementKind::from_name) {
        Some(kind) => kind,
        None => {
            return Err(GeoanchorError::Config(format!(
                "{path}.kind must be one of rod, shell, solid"
            )))
        }
    };

    let materials = if section.has_key("materials") {
        Some(
            ids(&section["materials"], &format!("{path}.materials"))?
                .into_iter()
                .collect::<BTreeSet<_>>(),
        )
    } else {
        None
    };
    let mesh_sets = if section.has_key("mesh_sets") {
        Some(ids(&section["mesh_sets"], &format!("{path}.mesh_sets"))?)
    } else {
        None
    };

    Ok(NodeSelector {
        kind,
        materials,
        mesh_sets,
    })
}

fn boolean(section: &JsonValue, key: &str, path: &str) -> Result<bool, GeoanchorError> {
    match section[key].as_bool() {
        Some(b) => Ok(b),
        None => Err(GeoanchorError::Config(format!(
            "{path}.{key} must be true or false"
        ))),
    }
}

fn members<'a>(value: &'a JsonValue, path: &str) -> Result<json::iterators::Members<'a>, GeoanchorError> {
    if !value.is_array() {
        return Err(GeoanchorError::Config(format!("{path} must be an array")));
    }
    Ok(value.members())
}

fn numbers(value: &JsonValue, path: &str) -> Result<Vec<f64>, GeoanchorError> {
    members(value, path)?
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                GeoanchorError::Config(format!("{path} must only contain numbers"))
            })
        })
        .collect()
}

fn ids(value: &JsonValue, path: &str) -> Result<Vec<u32>, GeoanchorError> {
    members(value, path)?
        .map(|v| {
            v.as_u32().ok_or_else(|| {
                GeoanchorError::Config(format!("{path} must only contain integer ids"))
            })
        })
        .collect()
}

fn strings(value: &JsonValue, path: &str) -> Result<Vec<String>, GeoanchorError> {
    members(value, path)?
        .map(|v| {
            v.as_str()
                .map(str::to_owned)
                .ok_or_else(|| GeoanchorError::Config(format!("{path} must only contain strings")))
        })
        .collect()
}
