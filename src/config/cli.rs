use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use crate::domain::error::DomainError;
use crate::domain::filter::{PostFilterParams, SortMode};

/// Command-line arguments for the Darkroom binary.
#[derive(Debug, Parser)]
#[command(name = "darkroom", version, about = "Darkroom photo catalog")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DARKROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending schema migrations.
    Migrate(CommonArgs),
    /// Print every post id in ascending order.
    Ids(CommonArgs),
    /// Print one page of posts matching a filter.
    Find(Box<FindArgs>),
    /// Delete a post by id.
    Delete(DeleteArgs),
    /// Print the most used keywords.
    Keywords(KeywordsArgs),
    /// Print every distinct author.
    Authors(CommonArgs),
}

impl Command {
    pub fn overrides(&self) -> &Overrides {
        match self {
            Command::Migrate(args) | Command::Ids(args) | Command::Authors(args) => {
                &args.overrides
            }
            Command::Find(args) => &args.common.overrides,
            Command::Delete(args) => &args.common.overrides,
            Command::Keywords(args) => &args.common.overrides,
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonArgs {
    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", env = "DATABASE_URL", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long = "log-json", value_parser = BoolishValueParser::new(), value_name = "BOOL")]
    pub log_json: Option<bool>,

    /// Override the cache backend (memory or redis).
    #[arg(long = "cache-backend", value_name = "KIND")]
    pub cache_backend: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Id of the post to delete.
    pub id: i64,
}

#[derive(Debug, Args, Clone)]
pub struct KeywordsArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of keywords to print.
    #[arg(long)]
    pub limit: Option<i64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FindArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Ordering: latest, top or random.
    #[arg(long)]
    pub sort: Option<String>,
    #[arg(long = "page-size")]
    pub page_size: Option<i64>,
    /// Keyset cursor taken from the previous page.
    #[arg(long = "page-id")]
    pub page_id: Option<i64>,
    /// Seed for random ordering.
    #[arg(long)]
    pub seed: Option<i64>,
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub nsfw: Option<bool>,
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub grayscale: Option<bool>,
    #[arg(long, value_parser = BoolishValueParser::new())]
    pub sprocket: Option<bool>,
    /// Restrict to these ids; repeatable.
    #[arg(long = "id")]
    pub ids: Vec<i64>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub author: Option<String>,
    /// Required color name; repeatable, paired with --min-color by position.
    #[arg(long = "color")]
    pub colors: Vec<String>,
    #[arg(long = "min-color")]
    pub min_colors: Vec<f64>,
    /// Required keyword; repeatable.
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,
    #[arg(long = "min-width")]
    pub min_width: Option<i32>,
    #[arg(long = "max-width")]
    pub max_width: Option<i32>,
    #[arg(long = "min-height")]
    pub min_height: Option<i32>,
    #[arg(long = "max-height")]
    pub max_height: Option<i32>,
    #[arg(long = "min-aspect-ratio")]
    pub min_aspect_ratio: Option<f64>,
    #[arg(long = "max-aspect-ratio")]
    pub max_aspect_ratio: Option<f64>,
}

impl FindArgs {
    pub fn to_params(&self) -> Result<PostFilterParams, DomainError> {
        let sort = self.sort.as_deref().map(str::parse::<SortMode>).transpose()?;
        Ok(PostFilterParams {
            limit: self.page_size,
            sort,
            cursor: self.page_id,
            nsfw: self.nsfw,
            grayscale: self.grayscale,
            sprocket: self.sprocket,
            seed: self.seed,
            ids: (!self.ids.is_empty()).then(|| self.ids.clone()),
            title: self.title.clone(),
            author: self.author.clone(),
            colors: self.colors.clone(),
            min_color_percents: self.min_colors.clone(),
            keywords: self.keywords.clone(),
            min_width: self.min_width,
            max_width: self.max_width,
            min_height: self.min_height,
            max_height: self.max_height,
            min_aspect_ratio: self.min_aspect_ratio,
            max_aspect_ratio: self.max_aspect_ratio,
        })
    }
}
