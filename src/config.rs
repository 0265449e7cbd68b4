#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_MIRROR_PORT: u16 = 8080;
pub const DEFAULT_MIRROR_HOST: &str = "127.0.0.1";
pub const API_KEY_VAR: &str = "YOUTUBE_API_KEY";
const DEFAULT_WWW_SUBDIR: &str = "www";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub archive_root: PathBuf,
    pub www_root: PathBuf,
    pub api_key: Option<String>,
    pub mirror_port: u16,
    pub mirror_host: String,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub archive_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub mirror_port: Option<u16>,
    pub mirror_host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeConfig> {
    build_runtime_config_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let archive_root = overrides
        .archive_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("MIRROR_ROOT", file_vars, &env_lookup))
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("MIRROR_ROOT not set (pass --root or add it to .env)"))?;
    let www_root = overrides
        .www_root
        .or_else(|| lookup_value("WWW_ROOT", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| archive_root.join(DEFAULT_WWW_SUBDIR));
    let api_key = lookup_value(API_KEY_VAR, file_vars, &env_lookup)
        .filter(|value| !value.trim().is_empty());
    let mirror_port = overrides
        .mirror_port
        .or_else(|| {
            lookup_value("MIRROR_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_MIRROR_PORT);
    let mirror_host = overrides
        .mirror_host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("MIRROR_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MIRROR_HOST.to_string());
    Ok(RuntimeConfig {
        archive_root,
        www_root,
        api_key,
        mirror_port,
        mirror_host,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Updates or appends a single env var inside the target file while preserving
/// unrelated lines and comments.
pub fn upsert_env_value(path: &Path, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
    }

    let raw = fs::read_to_string(path).unwrap_or_default();
    let mut lines = Vec::new();
    let mut updated = false;
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");

    for line in raw.lines() {
        let trimmed = line.trim_start();
        let indent = &line[..line.len() - trimmed.len()];
        let (prefix, rest) = match trimmed.strip_prefix("export ") {
            Some(stripped) => ("export ", stripped),
            None => ("", trimmed),
        };
        match rest.split_once('=') {
            Some((candidate, _)) if candidate.trim() == key => {
                lines.push(format!("{indent}{prefix}{key}=\"{escaped}\""));
                updated = true;
            }
            _ => lines.push(line.to_string()),
        }
    }

    if !updated {
        lines.push(format!("{key}=\"{escaped}\""));
    }

    crate::codec::write_atomic(path, (lines.join("\n") + "\n").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn runtime_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_fill_missing_values() {
        let runtime = runtime_from("MIRROR_ROOT=\"/archive\"\n");
        assert_eq!(runtime.archive_root, PathBuf::from("/archive"));
        assert_eq!(runtime.www_root, PathBuf::from("/archive/www"));
        assert_eq!(runtime.mirror_port, DEFAULT_MIRROR_PORT);
        assert_eq!(runtime.mirror_host, DEFAULT_MIRROR_HOST);
        assert!(runtime.api_key.is_none());
    }

    #[test]
    fn reads_every_key() {
        let runtime = runtime_from(
            "MIRROR_ROOT=/a\nWWW_ROOT=/w\nYOUTUBE_API_KEY=secret\nMIRROR_PORT=9090\nMIRROR_HOST=0.0.0.0\n",
        );
        assert_eq!(runtime.www_root, PathBuf::from("/w"));
        assert_eq!(runtime.api_key.as_deref(), Some("secret"));
        assert_eq!(runtime.mirror_port, 9090);
        assert_eq!(runtime.mirror_host, "0.0.0.0");
    }

    #[test]
    fn missing_root_is_an_error() {
        let vars = HashMap::new();
        let err = build_runtime_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("MIRROR_ROOT"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("MIRROR_ROOT=\"/file\"\n").path()).unwrap();
        let runtime = build_runtime_config(&vars, |key| {
            (key == "MIRROR_ROOT").then(|| "/env".to_string())
        })
        .unwrap();
        assert_eq!(runtime.archive_root, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env() {
        let mut vars = HashMap::new();
        vars.insert("MIRROR_ROOT".to_string(), "/file".to_string());
        vars.insert("MIRROR_PORT".to_string(), "7000".to_string());
        let runtime = build_runtime_config_with_overrides(
            &vars,
            |key| (key == "MIRROR_PORT").then(|| "8000".to_string()),
            RuntimeOverrides {
                archive_root: Some(PathBuf::from("/override")),
                mirror_port: Some(9000),
                mirror_host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(runtime.archive_root, PathBuf::from("/override"));
        assert_eq!(runtime.mirror_port, 9000);
        assert_eq!(runtime.mirror_host, DEFAULT_MIRROR_HOST);
    }

    #[test]
    fn invalid_port_defaults() {
        let runtime = runtime_from("MIRROR_ROOT=/m\nMIRROR_PORT=nope\n");
        assert_eq!(runtime.mirror_port, DEFAULT_MIRROR_PORT);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export MIRROR_ROOT="/media"
            WWW_ROOT='/www'
            MIRROR_HOST =  "0.0.0.0"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("MIRROR_ROOT").unwrap(), "/media");
        assert_eq!(vars.get("WWW_ROOT").unwrap(), "/www");
        assert_eq!(vars.get("MIRROR_HOST").unwrap(), "0.0.0.0");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn upsert_replaces_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# keep me\nexport YOUTUBE_API_KEY=old\nMIRROR_ROOT=/a\n").unwrap();

        upsert_env_value(&path, API_KEY_VAR, "new\"key").unwrap();
        upsert_env_value(&path, "MIRROR_PORT", "9000").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(
            raw,
            "# keep me\nexport YOUTUBE_API_KEY=\"new\\\"key\"\nMIRROR_ROOT=/a\nMIRROR_PORT=\"9000\"\n"
        );
    }
}
