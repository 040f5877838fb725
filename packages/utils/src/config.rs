use anyhow::{bail, Context, Result};
use figment::{providers::Format, Figment};
use serde::{de::DeserializeOwned, Serialize};
use std::{marker::PhantomData, path::PathBuf};

/// Env var naming an extra dotenv file, honored by every binary
pub const DOTENV_ENV_VAR: &str = "FLUX_MONITOR_DOTENV";

/// The builder we use to build Config
#[derive(Debug)]
pub struct ConfigBuilder<CONFIG, ARG> {
    pub cli_env_args: ARG,
    _config: PhantomData<CONFIG>,
}

pub trait CliEnvExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "FLUX_MONITOR"
    const ENV_VAR_PREFIX: &'static str;

    // The section identifier in the TOML file, e.g. "flux-monitor"
    const TOML_IDENTIFIER: &'static str;

    // directory name used for the fallback search paths, e.g. "flux-monitor"
    const DIRNAME: &'static str;

    const PRINT_DEBUG_MSGS: bool = false;

    // explicit directory holding the config file
    // if not supplied, a series of fallbacks is tried
    fn home_dir(&self) -> Option<PathBuf>;

    // explicit dotenv file, loaded before anything else
    fn dotenv_path(&self) -> Option<PathBuf>;

    fn merge_cli_env_args(&self) -> Result<Self> {
        let env_prefix = format!("{}_", Self::ENV_VAR_PREFIX);

        let merged = Figment::new()
            .merge(figment::providers::Env::prefixed(&env_prefix))
            .merge(figment::providers::Serialized::defaults(self))
            .extract()?;

        Ok(merged)
    }

    fn env_var(name: &str) -> Option<String> {
        std::env::var(format!("{}_{name}", Self::ENV_VAR_PREFIX)).ok()
    }
}

pub trait ConfigExt: Serialize + DeserializeOwned + Default + std::fmt::Debug {
    // e.g. "flux-monitor.toml"
    const FILENAME: &'static str;

    fn log_levels(&self) -> impl Iterator<Item = &str>;

    fn tracing_env_filter(&self) -> Result<tracing_subscriber::EnvFilter> {
        let mut filter = tracing_subscriber::EnvFilter::from_default_env();
        for directive in self.log_levels() {
            match directive.parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => bail!("{}: {}", err, directive),
            }
        }

        Ok(filter)
    }

    // hook for checks that serde alone cannot express
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl<CONFIG: ConfigExt, ARG: CliEnvExt> ConfigBuilder<CONFIG, ARG> {
    pub fn new(cli_env_args: ARG) -> Self {
        Self {
            cli_env_args,
            _config: PhantomData,
        }
    }

    pub fn filepaths_to_try(cli_env_args: &ARG) -> Vec<PathBuf> {
        ConfigFilePath::new(CONFIG::FILENAME, ARG::DIRNAME, cli_env_args.home_dir())
            .into_possible()
    }

    pub fn build(self) -> Result<CONFIG> {
        // dotenv first, since it may affect env vars for filepaths
        let mut dotenv_paths = Vec::new();

        if let Some(dotenv_path) = self.cli_env_args.dotenv_path() {
            dotenv_paths.push(dotenv_path);
        }

        if let Ok(dotenv_path) = std::env::var(DOTENV_ENV_VAR) {
            dotenv_paths.push(PathBuf::from(dotenv_path));
        }

        dotenv_paths.push(std::env::current_dir()?.join(".env"));

        for dotenv_path in dotenv_paths {
            if ARG::PRINT_DEBUG_MSGS {
                eprintln!("Loading env vars from {}", dotenv_path.display());
            }
            if dotenv_path.exists() {
                if let Err(e) = dotenvy::from_path(&dotenv_path) {
                    bail!("Error loading dotenv file {}: {}", dotenv_path.display(), e);
                }
            }
        }

        let cli_env_args = self.cli_env_args.merge_cli_env_args()?;

        let mut figment = Figment::new()
            .merge(figment::providers::Serialized::defaults(CONFIG::default()));

        match ConfigFilePath::new(CONFIG::FILENAME, ARG::DIRNAME, cli_env_args.home_dir())
            .into_path()
        {
            Some(filepath) => {
                if ARG::PRINT_DEBUG_MSGS {
                    eprintln!("Loading config from {}", filepath.display());
                }
                let filepath = shellexpand::tilde(&filepath.to_string_lossy()).to_string();

                figment = figment
                    // shared values from the [default] section
                    .merge(Figment::from(
                        figment::providers::Toml::file(&filepath).nested(),
                    ))
                    // our own section overrides the shared one
                    .merge(
                        Figment::from(figment::providers::Toml::file(&filepath).nested())
                            .select(ARG::TOML_IDENTIFIER),
                    );
            }
            None => {
                tracing::debug!(
                    "No {} found (home: {:?}), using defaults",
                    CONFIG::FILENAME,
                    cli_env_args.home_dir()
                );
            }
        }

        // cli and env win over every profile of the file
        let config: CONFIG = figment
            .merge(figment::providers::Serialized::globals(cli_env_args))
            .extract()
            .context("Error extracting config")?;

        config.validate()?;

        Ok(config)
    }
}

// tries a series of fallback directories, looking for a config file
#[derive(Clone, Debug)]
pub struct ConfigFilePath {
    pub filename: String,
    pub dirname: String,
    // the optional directory set via direct args or env
    pub arg_env_dir: Option<PathBuf>,
}

impl ConfigFilePath {
    pub fn new(
        filename: impl ToString,
        dirname: impl ToString,
        arg_env_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            filename: filename.to_string(),
            dirname: dirname.to_string(),
            arg_env_dir,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        self.into_possible().into_iter().find(|path| path.exists())
    }

    pub fn into_possible(self) -> Vec<PathBuf> {
        let Self {
            filename,
            dirname,
            arg_env_dir,
        } = self;

        let mut dirs = Vec::new();

        // explicit, e.g. --home /foo or FLUX_MONITOR_HOME=/foo
        if let Some(dir) = arg_env_dir {
            dirs.push(dir);
        }

        if let Ok(dir) = std::env::current_dir() {
            dirs.push(dir);
        }

        // ~/.flux-monitor/flux-monitor.toml
        if let Some(dir) = dirs::home_dir().map(|dir| dir.join(format!(".{dirname}"))) {
            dirs.push(dir);
        }

        // platform config dir, e.g. ~/.config/flux-monitor on linux
        if let Some(dir) = dirs::config_dir().map(|dir| dir.join(&dirname)) {
            dirs.push(dir);
        }

        dirs.push(PathBuf::from("/etc").join(&dirname));

        dirs.dedup();

        dirs.into_iter().map(|dir| dir.join(&filename)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_is_tried_first() {
        let paths = ConfigFilePath::new("flux.toml", "flux", Some("/tmp/flux-home".into()))
            .into_possible();

        assert_eq!(paths[0], PathBuf::from("/tmp/flux-home/flux.toml"));
        assert_eq!(paths.last(), Some(&PathBuf::from("/etc/flux/flux.toml")));
        assert!(paths.iter().all(|p| p.ends_with("flux.toml")));
    }

    #[test]
    fn missing_file_yields_none() {
        let path = ConfigFilePath::new(
            "definitely-not-a-real-config-file.toml",
            "definitely-not-a-real-dir",
            Some("/nonexistent/dir".into()),
        )
        .into_path();

        assert!(path.is_none());
    }
}
