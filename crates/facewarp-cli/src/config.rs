use anyhow::{bail, Context, Result};
use facewarp_core::{
    Border, Interpolation, PointSet, SimilarityAligner, Size, Template, WarpOptions,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_TEMPLATE: &str = "arcface-112";
const DEFAULT_WORKERS: usize = 2;

/// CLI configuration: defaults, then a TOML file, then `FACEWARP_*`
/// environment variables. Command-line flags are applied by the caller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Template name used when none is given on the command line.
    pub template: String,
    /// Crop size; the template's reference size when unset.
    pub output_size: Option<Size>,
    pub allow_reflection: bool,
    pub interpolation: Interpolation,
    pub border: Border,
    /// Alignment worker threads for `batch`.
    pub workers: usize,
    /// Templates declared in the config file.
    pub templates: Vec<Template>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            output_size: None,
            allow_reflection: true,
            interpolation: Interpolation::default(),
            border: Border::default(),
            workers: DEFAULT_WORKERS,
            templates: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    template: Option<String>,
    output_size: Option<Size>,
    allow_reflection: Option<bool>,
    interpolation: Option<Interpolation>,
    border: Option<BorderSetting>,
    workers: Option<usize>,
    templates: BTreeMap<String, FileTemplate>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BorderSetting {
    Fill(f64),
    Named(String),
}

#[derive(Debug, Deserialize)]
struct FileTemplate {
    size: Size,
    points: PointSet,
}

impl Config {
    /// Load from the config file (if any) and the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Locate and read the config file through `env`, then layer `env` on top.
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = match config_path(&env) {
            Some(path) => {
                tracing::debug!(path = %path.display(), "reading config file");
                Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("reading config {}", path.display()))?,
                )
            }
            None => None,
        };
        Self::from_layers(text.as_deref(), env)
    }

    /// Build from optional TOML text and an environment lookup.
    pub fn from_layers(toml_text: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(text) = toml_text {
            let file: FileConfig = toml::from_str(text).context("parsing config TOML")?;
            config.apply_file(file)?;
        }
        config.apply_env(env);
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<()> {
        if let Some(v) = file.template {
            self.template = v;
        }
        if let Some(v) = file.output_size {
            self.output_size = Some(v);
        }
        if let Some(v) = file.allow_reflection {
            self.allow_reflection = v;
        }
        if let Some(v) = file.interpolation {
            self.interpolation = v;
        }
        match file.border {
            Some(BorderSetting::Fill(v)) => self.border = Border::Constant(v),
            Some(BorderSetting::Named(s)) => {
                self.border = Border::from_str(&s).map_err(anyhow::Error::msg)?;
            }
            None => {}
        }
        if let Some(v) = file.workers {
            self.workers = v.max(1);
        }
        for (name, t) in file.templates {
            if Template::builtin(&name).is_some() {
                bail!("config template {name:?} shadows a built-in template");
            }
            let template = Template::new(name.clone(), t.size, t.points)
                .with_context(|| format!("config template {name:?}"))?;
            self.templates.push(template);
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("FACEWARP_TEMPLATE") {
            self.template = v;
        }
        if let Some(v) = env_parse::<Size>(&env, "FACEWARP_OUTPUT_SIZE") {
            self.output_size = Some(v);
        }
        if let Some(v) = env("FACEWARP_ALLOW_REFLECTION") {
            self.allow_reflection = v != "0";
        }
        if let Some(v) = env_parse::<Interpolation>(&env, "FACEWARP_INTERPOLATION") {
            self.interpolation = v;
        }
        if let Some(v) = env_parse::<Border>(&env, "FACEWARP_BORDER") {
            self.border = v;
        }
        if let Some(v) = env_parse::<usize>(&env, "FACEWARP_WORKERS") {
            self.workers = v.max(1);
        }
    }

    /// Look a template up among configured ones first, then built-ins.
    pub fn resolve_template(&self, name: &str) -> Result<Template> {
        self.templates
            .iter()
            .find(|t| t.name == name)
            .cloned()
            .or_else(|| Template::builtin(name))
            .with_context(|| format!("unknown template {name:?}"))
    }

    /// All templates available to this configuration.
    pub fn all_templates(&self) -> Vec<Template> {
        let mut all = Template::builtins();
        all.extend(self.templates.iter().cloned());
        all
    }

    pub fn aligner(&self) -> SimilarityAligner {
        SimilarityAligner::new(
            self.allow_reflection,
            WarpOptions {
                interpolation: self.interpolation,
                border: self.border,
            },
        )
    }
}

/// `$FACEWARP_CONFIG`, else the XDG config file when it exists.
fn config_path(env: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(path) = env("FACEWARP_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    let path = base.join("facewarp").join("config.toml");
    path.exists().then_some(path)
}

fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_layers(None, no_env).unwrap();
        assert_eq!(config.template, "arcface-112");
        assert!(config.allow_reflection);
        assert_eq!(config.interpolation, Interpolation::Bilinear);
        assert_eq!(config.border, Border::Constant(0.0));
        assert_eq!(config.workers, 2);
        assert!(config.output_size.is_none());
    }

    #[test]
    fn test_file_layer() {
        let text = r#"
            template = "mtcnn-96x112"
            output_size = [192, 224]
            allow_reflection = false
            interpolation = "nearest"
            border = 127.5
            workers = 8
        "#;
        let config = Config::from_layers(Some(text), no_env).unwrap();
        assert_eq!(config.template, "mtcnn-96x112");
        assert_eq!(config.output_size, Some(Size::new(192, 224)));
        assert!(!config.allow_reflection);
        assert_eq!(config.interpolation, Interpolation::Nearest);
        assert_eq!(config.border, Border::Constant(127.5));
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let text = r#"
            template = "mtcnn-96x112"
            border = "replicate"
        "#;
        let env: HashMap<&str, &str> = [
            ("FACEWARP_TEMPLATE", "arcface-112"),
            ("FACEWARP_OUTPUT_SIZE", "224x224"),
            ("FACEWARP_ALLOW_REFLECTION", "0"),
            ("FACEWARP_WORKERS", "0"),
        ]
        .into_iter()
        .collect();
        let config =
            Config::from_layers(Some(text), |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.template, "arcface-112");
        assert_eq!(config.output_size, Some(Size::square(224)));
        assert!(!config.allow_reflection);
        assert_eq!(config.border, Border::Replicate);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_bad_env_value_ignored() {
        let config = Config::from_layers(None, |k| {
            (k == "FACEWARP_INTERPOLATION").then(|| "cubic".to_string())
        })
        .unwrap();
        assert_eq!(config.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn test_custom_template() {
        let text = r#"
            [templates.eyes-nose]
            size = [64, 64]
            points = [[20.0, 24.0], [44.0, 24.0], [32.0, 40.0]]
        "#;
        let config = Config::from_layers(Some(text), no_env).unwrap();
        let t = config.resolve_template("eyes-nose").unwrap();
        assert_eq!(t.size, Size::square(64));
        assert_eq!(t.len(), 3);
        assert!(config.resolve_template("arcface-112").is_ok());
        assert!(config.resolve_template("missing").is_err());
        assert_eq!(config.all_templates().len(), 3);
    }

    #[test]
    fn test_rejects_shadowing_and_unknown_keys() {
        let shadow = r#"
            [templates.arcface-112]
            size = [112, 112]
            points = [[0.0, 0.0], [1.0, 1.0]]
        "#;
        assert!(Config::from_layers(Some(shadow), no_env).is_err());
        assert!(Config::from_layers(Some("colour = \"red\""), no_env).is_err());
    }

    fn env_from(pairs: Vec<(&'static str, String)>) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&'static str, String> = pairs.into_iter().collect();
        move |k| map.get(k).cloned()
    }

    fn write_config(dir: &std::path::Path, text: &str) -> PathBuf {
        let path = dir.join("facewarp").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_load_from_xdg_and_home() {
        let xdg = tempfile::tempdir().unwrap();
        write_config(xdg.path(), "workers = 3\n");
        let config = Config::load_with(env_from(vec![(
            "XDG_CONFIG_HOME",
            xdg.path().display().to_string(),
        )]))
        .unwrap();
        assert_eq!(config.workers, 3);

        let home = tempfile::tempdir().unwrap();
        write_config(&home.path().join(".config"), "template = \"mtcnn-96x112\"\n");
        let config =
            Config::load_with(env_from(vec![("HOME", home.path().display().to_string())])).unwrap();
        assert_eq!(config.template, "mtcnn-96x112");
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let xdg = tempfile::tempdir().unwrap();
        write_config(xdg.path(), "workers = 3\n");
        let other = tempfile::tempdir().unwrap();
        let explicit = other.path().join("custom.toml");
        std::fs::write(&explicit, "workers = 5\n").unwrap();

        let config = Config::load_with(env_from(vec![
            ("XDG_CONFIG_HOME", xdg.path().display().to_string()),
            ("FACEWARP_CONFIG", explicit.display().to_string()),
            ("FACEWARP_WORKERS", "6".to_string()),
        ]))
        .unwrap();
        assert_eq!(config.workers, 6);

        let config = Config::load_with(env_from(vec![(
            "FACEWARP_CONFIG",
            explicit.display().to_string(),
        )]))
        .unwrap();
        assert_eq!(config.workers, 5);

        let missing = other.path().join("nope.toml");
        assert!(Config::load_with(env_from(vec![(
            "FACEWARP_CONFIG",
            missing.display().to_string(),
        )]))
        .is_err());
    }

    #[test]
    fn test_load_without_config_file() {
        let empty = tempfile::tempdir().unwrap();
        let config = Config::load_with(env_from(vec![(
            "XDG_CONFIG_HOME",
            empty.path().display().to_string(),
        )]))
        .unwrap();
        assert_eq!(config.workers, 2);
        assert!(Config::load_with(no_env).unwrap().templates.is_empty());
    }
}
