use common::util::{self, local_now};
use flate2::{write::GzEncoder, Compression};
use log::*;
use log4rs::{
    append::{
        console::ConsoleAppender,
        rolling_file::{
            policy::compound::{roll::Roll, trigger::size::SizeTrigger, CompoundPolicy},
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::{self, Color, Encode, Style},
    filter::{Filter, Response},
};
use std::{
    borrow::Cow,
    fmt::{self, Display, Formatter},
    fs::{read_dir, remove_file, rename, File},
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::Mutex,
    thread,
};
use time::OffsetDateTime;

const FILE_SIZE_LIMIT: u64 = 50_000_000;
const LOG_FILE: &str = "./logs/latest.log";
const CRATES: [&str; 6] = ["common", "entity", "engine", "history", "rest", "store"];

// Colored console output plus a size-rolled, gzipped log file
pub fn init_logger(level: LevelFilter) -> Result<(), anyhow::Error> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(LogEncoder { styled: true }))
        .build();

    let log_file = RollingFileAppender::builder()
        .encoder(Box::new(LogEncoder { styled: false }))
        .build(
            LOG_FILE,
            Box::new(CompoundPolicy::new(
                Box::new(SizeTrigger::new(FILE_SIZE_LIMIT)),
                Box::new(CustomLogRoller::new()),
            )),
        )?;

    let config = Config::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(CrateFilter))
                .build("console", Box::new(console)),
        )
        .appender(
            Appender::builder()
                .filter(Box::new(CrateFilter))
                .build("log_file", Box::new(log_file)),
        )
        .build(
            Root::builder()
                .appender("console")
                .appender("log_file")
                .build(level),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}

// Called at the end of main, compresses the last log file
pub fn cleanup() {
    // Nothing useful can be done with an error this late
    let _ = CustomLogRoller::new().roll_threaded(Path::new(LOG_FILE), false);
}

fn format_time(datetime: OffsetDateTime) -> String {
    match datetime.format(&*util::TIME_FORMAT) {
        Ok(formatted) => formatted,
        Err(_) => "??:??:??".to_owned(),
    }
}

fn format_record(record: &Record<'_>) -> String {
    let location = Location::from_record(record);
    format!(
        "[{} {}{}{}]: {}",
        format_time(local_now()),
        record.metadata().level(),
        if matches!(location, Location::Some { .. }) {
            " "
        } else {
            ""
        },
        location,
        record.args()
    )
}

// Only allow logging from our crates
#[derive(Debug)]
struct CrateFilter;

impl Filter for CrateFilter {
    fn filter(&self, record: &Record) -> Response {
        match record.module_path() {
            Some(path) if is_own_module(path) => Response::Accept,
            _ => Response::Reject,
        }
    }
}

fn is_own_module(path: &str) -> bool {
    let krate = path.split("::").next().unwrap_or(path);
    CRATES.contains(&krate) || krate == "rebalance"
}

#[derive(Debug)]
struct CustomLogRoller {
    name_info: Mutex<(u16, u32)>, // current day, log count for today
}

impl CustomLogRoller {
    pub fn new() -> Self {
        let mut max_index = 0;

        if let Ok(paths) = read_dir("./logs/") {
            let today = local_now().format(&*util::DATE_FORMAT).unwrap_or_default();

            // Highest index among today's archives ({date}-{index}.log.gz)
            for path in paths
                .flatten()
                .flat_map(|entry| entry.file_name().into_string())
                .filter(|name| name.starts_with(&today))
            {
                if let Some(index) = Self::index_from_path(&path) {
                    max_index = max_index.max(index);
                }
            }
        }

        CustomLogRoller {
            name_info: Mutex::new((local_now().ordinal(), max_index)),
        }
    }

    fn index_from_path(path: &str) -> Option<u32> {
        let dash_index = path.rfind('-')?;
        let dot_index = path.find('.')?;
        path.get(dash_index.saturating_add(1)..dot_index)
            .and_then(|index| index.parse::<u32>().ok())
    }

    pub fn roll_threaded(&self, file: &Path, threaded: bool) -> Result<(), anyhow::Error> {
        let mut guard = self
            .name_info
            .lock()
            .map_err(|_| anyhow::anyhow!("Log roller mutex poisoned"))?;

        let local_datetime = local_now();
        if local_datetime.ordinal() != guard.0 {
            guard.0 = local_datetime.ordinal();
            guard.1 = 1;
        } else {
            guard.1 = guard.1.wrapping_add(1);
        }

        // Move the file out of the way first since compression may take a while
        let log = "./logs/latest-tmp.log";
        rename(file, log)?;

        let output = format!(
            "./logs/{}-{}.log.gz",
            local_datetime.format(&*util::DATE_FORMAT)?,
            guard.1
        );

        drop(guard);

        if threaded {
            thread::spawn(move || {
                Self::try_compress_log(log, &output);
            });
        } else {
            Self::try_compress_log(log, &output);
        }

        Ok(())
    }

    fn try_compress_log(input_path: &str, output_path: &str) {
        if let Err(error) = Self::compress_log(Path::new(input_path), Path::new(output_path)) {
            error!("Failed to compress log file: {error:?}");
        }
    }

    // Gzips the source into the output path, then removes the source
    fn compress_log(input_path: &Path, output_path: &Path) -> Result<(), io::Error> {
        let mut input = File::open(input_path)?;
        let mut output = GzEncoder::new(File::create(output_path)?, Compression::default());
        io::copy(&mut input, &mut output)?;
        drop(output.finish()?);
        drop(input); // Must be closed before deletion on some platforms
        remove_file(input_path)
    }
}

impl Roll for CustomLogRoller {
    fn roll(&self, file: &Path) -> Result<(), anyhow::Error> {
        self.roll_threaded(file, true)
    }
}

#[derive(Debug)]
struct LogEncoder {
    styled: bool,
}

impl LogEncoder {
    fn level_style(level: Level) -> Style {
        let mut style = Style::new();
        match level {
            Level::Error => style.text(Color::Red),
            Level::Warn => style.text(Color::Yellow),
            Level::Debug => style.text(Color::Cyan).intense(true),
            Level::Trace => style.text(Color::Magenta).intense(true),
            Level::Info => style.text(Color::White),
        };
        style
    }
}

impl Encode for LogEncoder {
    fn encode(&self, writer: &mut dyn encode::Write, record: &Record<'_>) -> anyhow::Result<()> {
        if self.styled {
            writer.set_style(&Self::level_style(record.level()))?;
        }

        writeln!(writer, "{}", format_record(record))?;

        if self.styled {
            writer.set_style(&Style::new())?;
        }

        Ok(())
    }
}

enum Location<'a> {
    None,
    Some { file: Cow<'a, str>, line: u32 },
}

impl<'a> Location<'a> {
    fn from_record(record: &Record<'a>) -> Self {
        let (file, line) = match record.level() {
            Level::Info | Level::Warn => return Self::None,
            _ => match (record.file(), record.line()) {
                (Some(file), Some(line)) => (file, line),
                _ => return Self::None,
            },
        };

        Self::Some {
            file: truncate_path(file),
            line,
        }
    }
}

// Drops leading path components up to and including `src`
fn truncate_path(file: &str) -> Cow<'_, str> {
    let truncated = Path::new(file)
        .components()
        .skip_while(|component| {
            matches!(
                component,
                Component::Prefix(_)
                    | Component::RootDir
                    | Component::CurDir
                    | Component::ParentDir
            ) || component == &Component::Normal("src".as_ref())
        })
        .collect::<PathBuf>();

    match truncated.into_os_string().into_string() {
        Ok(string) => Cow::Owned(string),
        Err(_) => Cow::Borrowed(file),
    }
}

impl<'a> Display for Location<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Some { file, line } => write!(f, "{}:{}", file, line),
        }
    }
}
