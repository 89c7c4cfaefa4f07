// =============================================================================
// CONFIGURATION - Load settings from renderer.toml
// =============================================================================
//
// Every section is optional; missing keys take the defaults below and an
// unreadable file falls back to defaults entirely.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::ffi::CString;
use std::path::{Path, PathBuf};

use crate::backend::device::ContextConfig;
use crate::backend::shader::ShaderPaths;
use crate::logging::LoggingConfig;
use crate::renderer::RendererOptions;

pub const DEFAULT_CONFIG_PATH: &str = "renderer.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        let shaders = ShaderPaths::default();
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: shaders.vertex,
            fragment_shader: shaders.fragment,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub layers: Vec<String>,
    /// env_logger filter; `RUST_LOG` applies when unset.
    pub log_filter: Option<String>,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            log_filter: None,
        }
    }
}

impl Config {
    /// Load `renderer.toml`, see [`Config::load_or_default`].
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration, falling back to defaults on any error.
    ///
    /// The error is handed back rather than logged: this usually runs
    /// before the logger exists, so the caller reports it afterwards.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Validation is compiled out of release builds regardless of the file.
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    pub fn context_config(&self) -> Result<ContextConfig> {
        let validation_layers = if self.validation_enabled() {
            self.debug
                .layers
                .iter()
                .map(|name| CString::new(name.as_str()).with_context(|| format!("Invalid layer name {:?}", name)))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(ContextConfig {
            app_name: self.window.title.clone(),
            validation_layers,
        })
    }

    pub fn renderer_options(&self) -> Result<RendererOptions> {
        Ok(RendererOptions {
            context: self.context_config()?,
            shaders: ShaderPaths {
                vertex: self.graphics.vertex_shader.clone(),
                fragment: self.graphics.fragment_shader.clone(),
            },
            clear_color: self.graphics.clear_color,
        })
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            filter: self.debug.log_filter.clone(),
            ..LoggingConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from_path(dir.path().join("renderer.toml")).unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.graphics.vertex_shader, Path::new("assets/shaders/vert.spv"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let file = write_config(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]
            "#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.graphics.fragment_shader, Path::new("assets/shaders/frag.spv"));
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn default_graphics_section_uses_default_shader_paths() {
        let options = Config::default().renderer_options().unwrap();
        assert_eq!(options.shaders, ShaderPaths::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let file = write_config("[window\nwidth = ");
        assert!(Config::load_from_path(file.path()).is_err());
    }

    #[test]
    fn malformed_file_falls_back_and_hands_back_the_error() {
        let file = write_config("[window\nwidth = ");
        let (config, err) = Config::load_or_default(file.path());

        let err = err.expect("parse error must be returned to the caller");
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.title, "Ember");
    }

    #[test]
    fn readable_file_reports_no_error() {
        let file = write_config("[window]\nwidth = 1024\n");
        let (config, err) = Config::load_or_default(file.path());
        assert!(err.is_none());
        assert_eq!(config.window.width, 1024);

        let dir = tempfile::tempdir().unwrap();
        let (_, err) = Config::load_or_default(dir.path().join("missing.toml"));
        assert!(err.is_none());
    }

    #[test]
    fn disabled_validation_requests_no_layers() {
        let file = write_config("[debug]\nvalidation_layers = false\n");
        let config = Config::load_from_path(file.path()).unwrap();
        let ctx = config.context_config().unwrap();
        assert!(!ctx.validation_enabled());
        assert!(ctx.validation_layers.is_empty());
    }

    #[test]
    fn validation_layers_follow_build_profile() {
        let config = Config::default();
        let ctx = config.context_config().unwrap();
        assert_eq!(ctx.validation_enabled(), cfg!(debug_assertions));
        if cfg!(debug_assertions) {
            assert_eq!(ctx.validation_layers[0].to_str().unwrap(), "VK_LAYER_KHRONOS_validation");
        }
    }

    #[test]
    fn renderer_options_carry_shader_paths_and_clear_color() {
        let file = write_config(
            r#"
            [graphics]
            vertex_shader = "shaders/a.spv"
            fragment_shader = "shaders/b.spv"
            clear_color = [1.0, 0.0, 0.0, 1.0]

            [debug]
            log_filter = "debug"
            "#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        let options = config.renderer_options().unwrap();
        assert_eq!(options.shaders.vertex, Path::new("shaders/a.spv"));
        assert_eq!(options.shaders.fragment, Path::new("shaders/b.spv"));
        assert_eq!(options.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.logging_config().filter.as_deref(), Some("debug"));
    }

    #[test]
    fn layer_names_with_nul_are_rejected() {
        let mut config = Config::default();
        config.debug.layers = vec!["bad\0layer".into()];
        if cfg!(debug_assertions) {
            assert!(config.context_config().is_err());
        }
    }
}
