use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use microgame_core::session::SessionConfig;
use microgame_core::state_machine::{ModifierError, Modifiers, UndecidedFinish};
use microgame_core::typed::MicrogameId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("mods_root cannot be empty")]
    EmptyModsRoot,
    #[error("log_level cannot be empty")]
    EmptyLogLevel,
    #[error("Invalid microgame id `{0}`, expected author:name")]
    InvalidGame(String),
    #[error("--record cannot be combined with --speed or --difficulty")]
    RecordConflict,
    #[error(transparent)]
    Modifier(#[from] ModifierError),
    #[error("fps must be between 1 and 1000, got {0}")]
    InvalidFps(u32),
    #[error("bot_rate must be a non-negative number, got {0}")]
    InvalidBotRate(f32),
    #[error("Cannot read session config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid session config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid session config: {0}")]
    Session(String),
}

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "microgame-dev")]
#[command(about = "Microgame harness dev runner")]
#[command(long_about = "Dev runner for the microgame harness.

Loads the compiled-in microgames and every bundle under the mods root,
then plays microgames headlessly with an input bot, runs whole sessions,
lists the catalog or scaffolds new bundles.")]
pub struct Cli {
    /// Directory holding <author>/<bundle>/main.lua bundles
    #[arg(long, global = true, env = "MICROGAME_MODS_ROOT", default_value = "mods")]
    pub mods_root: PathBuf,

    /// Log filter (trace, debug, info, warn, error or a tracing directive)
    #[arg(long, global = true, env = "MICROGAME_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Play one microgame headlessly
    Run(RunArgs),
    /// Play microgames back to back until the lives run out
    Session(SessionArgs),
    /// Print every registered microgame
    List,
    /// Create a new bundle skeleton under the mods root
    New {
        /// Bundle id as author:name
        id: String,
    },
}

/// What finishing before a decision means
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishPolicy {
    Neutral,
    Lose,
}

impl From<FinishPolicy> for UndecidedFinish {
    fn from(policy: FinishPolicy) -> Self {
        match policy {
            FinishPolicy::Neutral => UndecidedFinish::Neutral,
            FinishPolicy::Lose => UndecidedFinish::Lose,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct RunArgs {
    /// Microgame to play as author:name (random when omitted)
    #[arg(long, env = "MICROGAME_GAME")]
    pub game: Option<String>,

    /// Speed override
    #[arg(long, env = "MICROGAME_SPEED", conflicts_with = "record")]
    pub speed: Option<f32>,

    /// Difficulty override (1-3)
    #[arg(long, env = "MICROGAME_DIFFICULTY", conflicts_with = "record")]
    pub difficulty: Option<u8>,

    /// Record every input event under the recordings directory
    #[arg(long)]
    pub record: bool,

    /// Directory for input recordings
    #[arg(long, default_value = "recordings")]
    pub recordings_dir: PathBuf,

    #[command(flatten)]
    pub frame: FrameArgs,

    /// Seed for the play-through and the input bot
    #[arg(long, env = "MICROGAME_SEED")]
    pub seed: Option<u64>,

    /// Outcome of finishing before a decision
    #[arg(long, value_enum, default_value = "neutral")]
    pub undecided_finish: FinishPolicy,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct SessionArgs {
    /// TOML file with session settings
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub frame: FrameArgs,

    /// Seed for picks, play-throughs and the input bot
    #[arg(long, env = "MICROGAME_SEED")]
    pub seed: Option<u64>,
}

/// Headless frame loop settings
#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct FrameArgs {
    /// Simulated frames per second
    #[arg(long, env = "MICROGAME_FPS", default_value = "60")]
    pub fps: u32,

    /// Average input events per second sent by the bot (0 stays idle)
    #[arg(long, default_value = "8")]
    pub bot_rate: f32,
}

impl FrameArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 || self.fps > 1000 {
            return Err(ConfigError::InvalidFps(self.fps));
        }
        if !self.bot_rate.is_finite() || self.bot_rate < 0.0 {
            return Err(ConfigError::InvalidBotRate(self.bot_rate));
        }
        Ok(())
    }

    pub fn frame_time(&self) -> f32 {
        1.0 / self.fps as f32
    }
}

impl RunArgs {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record && (self.speed.is_some() || self.difficulty.is_some()) {
            return Err(ConfigError::RecordConflict);
        }
        self.game_id()?;
        self.modifiers()?;
        self.frame.validate()
    }

    pub fn game_id(&self) -> Result<Option<MicrogameId>, ConfigError> {
        self.game
            .as_deref()
            .map(parse_id)
            .transpose()
    }

    /// Overrides applied on top of the defaults (difficulty 1, speed 1)
    pub fn modifiers(&self) -> Result<Modifiers, ConfigError> {
        let defaults = Modifiers::default();
        Ok(Modifiers::new(
            self.difficulty
                .unwrap_or_else(|| defaults.difficulty().level()),
            self.speed.unwrap_or_else(|| defaults.speed()),
        )?)
    }
}

impl Cli {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mods_root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyModsRoot);
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::EmptyLogLevel);
        }

        match &self.command {
            Command::Run(args) => args.validate(),
            Command::Session(args) => args.frame.validate(),
            Command::List => Ok(()),
            Command::New { id } => parse_id(id).map(|_| ()),
        }
    }
}

pub fn parse_id(raw: &str) -> Result<MicrogameId, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidGame(raw.to_string()))
}

/// Read session settings; missing keys take their defaults
pub async fn load_session_config(path: &Path) -> Result<SessionConfig, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let config: SessionConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config
        .validate()
        .map_err(|e| ConfigError::Session(e.to_string()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgame_core::state_machine::Difficulty;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("microgame-dev").chain(args.iter().copied()))
    }

    #[test]
    fn test_run_defaults() {
        let cli = parse(&["run"]).unwrap();
        cli.validate().unwrap();
        assert_eq!(cli.mods_root, PathBuf::from("mods"));

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.frame.fps, 60);
        assert_eq!(args.modifiers().unwrap(), Modifiers::default());
        assert_eq!(args.game_id().unwrap(), None);
        assert_eq!(args.undecided_finish, FinishPolicy::Neutral);
    }

    #[test]
    fn test_run_overrides() {
        let cli = parse(&[
            "--mods-root",
            "content",
            "run",
            "--game",
            "alice:catch",
            "--speed",
            "1.5",
            "--difficulty",
            "3",
            "--undecided-finish",
            "lose",
        ])
        .unwrap();
        cli.validate().unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let modifiers = args.modifiers().unwrap();
        assert_eq!(modifiers.difficulty(), Difficulty::MAX);
        assert_eq!(modifiers.speed(), 1.5);
        assert_eq!(
            args.game_id().unwrap(),
            Some(MicrogameId::new("alice", "catch"))
        );
        assert_eq!(
            UndecidedFinish::from(args.undecided_finish),
            UndecidedFinish::Lose
        );
    }

    #[test]
    fn test_record_conflicts_with_overrides() {
        assert!(parse(&["run", "--record", "--speed", "2"]).is_err());
        assert!(parse(&["run", "--record", "--difficulty", "2"]).is_err());
        assert!(parse(&["run", "--record"]).is_ok());
    }

    #[test]
    fn test_invalid_values() {
        let invalid = |args: &[&str]| parse(args).unwrap().validate().unwrap_err();

        assert!(matches!(
            invalid(&["run", "--difficulty", "4"]),
            ConfigError::Modifier(ModifierError::Difficulty(4))
        ));
        assert!(matches!(
            invalid(&["run", "--speed", "0"]),
            ConfigError::Modifier(ModifierError::Speed(_))
        ));
        assert!(matches!(
            invalid(&["run", "--game", "nocolon"]),
            ConfigError::InvalidGame(_)
        ));
        assert!(matches!(invalid(&["run", "--fps", "0"]), ConfigError::InvalidFps(0)));
        assert!(matches!(
            invalid(&["session", "--bot-rate=-1"]),
            ConfigError::InvalidBotRate(_)
        ));
        assert!(matches!(
            invalid(&["new", "a:b:c"]),
            ConfigError::InvalidGame(_)
        ));
    }

    #[test]
    fn test_validate_catches_record_conflict() {
        let args = RunArgs {
            game: None,
            speed: Some(2.0),
            difficulty: None,
            record: true,
            recordings_dir: PathBuf::from("recordings"),
            frame: FrameArgs {
                fps: 60,
                bot_rate: 8.0,
            },
            seed: None,
            undecided_finish: FinishPolicy::Neutral,
        };
        assert!(matches!(args.validate(), Err(ConfigError::RecordConflict)));
    }

    #[tokio::test]
    async fn test_load_session_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(
            &path,
            "lives = 2\nmax_speed = 1.5\nstart_difficulty = 2\nundecided_finish = \"lose\"\n",
        )
        .unwrap();

        let config = load_session_config(&path).await.unwrap();
        assert_eq!(config.lives, 2);
        assert_eq!(config.max_speed, 1.5);
        assert_eq!(config.start_difficulty, Difficulty::new(2).unwrap());
        assert_eq!(config.undecided_finish, UndecidedFinish::Lose);
        assert_eq!(config.games_per_level, SessionConfig::default().games_per_level);
    }

    #[tokio::test]
    async fn test_session_config_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_session_config(&dir.path().join("missing.toml")).await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "start_difficulty = 9\n").unwrap();
        assert!(matches!(
            load_session_config(&bad).await,
            Err(ConfigError::Parse { .. })
        ));

        let invalid = dir.path().join("invalid.toml");
        std::fs::write(&invalid, "lives = 0\n").unwrap();
        assert!(matches!(
            load_session_config(&invalid).await,
            Err(ConfigError::Session(_))
        ));
    }
}
