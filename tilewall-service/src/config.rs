use std::path::{Path, PathBuf};

use serde::Deserialize;
use tilewall_net::CodecKind;
use tilewall_types::Vec2i;

use crate::error::ServiceError;
use crate::layout::WallLayout;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    wall: WallSection,
    #[serde(default)]
    control_window: ControlWindowSection,
    #[serde(default)]
    service: ServiceSection,
}

#[derive(Deserialize, Default)]
struct WallSection {
    num_displays: Option<[i32; 2]>,
    window_size: Option<[i32; 2]>,
    bezel: Option<[i32; 2]>,
    stereo: Option<bool>,
}

#[derive(Deserialize, Default)]
struct ControlWindowSection {
    enabled: Option<bool>,
    size: Option<[i32; 2]>,
}

#[derive(Deserialize, Default)]
struct ServiceSection {
    info_port: Option<u16>,
    client_port: Option<u16>,
    head_node: Option<bool>,
    advertise_host: Option<String>,
    max_frames_in_flight: Option<u32>,
    assembler_threads: Option<usize>,
    codec: Option<String>,
}

/// Display service settings: the embedded defaults with the user's file
/// merged over them field by field.
pub struct ServiceConfig {
    wall: WallSection,
    control_window: ControlWindowSection,
    service: ServiceSection,
}

impl ServiceConfig {
    /// Load the defaults and merge `path`, or the user config file when no
    /// path is given. A missing, unreadable or malformed user file is
    /// logged and skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, ServiceError> {
        let mut config = Self::defaults()?;
        let path = path.map(Path::to_path_buf).or_else(user_config_path);

        if let Some(path) = path {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
                        Ok(user) => config.merge(user),
                        Err(e) => {
                            log::warn!(target: "config", "ignoring malformed config {}: {}", path.display(), e)
                        }
                    },
                    Err(e) => {
                        log::warn!(target: "config", "could not read config {}: {}", path.display(), e)
                    }
                }
            } else {
                log::debug!(target: "config", "no config at {}, using defaults", path.display());
            }
        }
        Ok(config)
    }

    /// Defaults with `overrides` (TOML text) merged over them.
    pub fn from_toml(overrides: &str) -> Result<Self, ServiceError> {
        let user: ConfigFile = toml::from_str(overrides)
            .map_err(|e| ServiceError::Config(format!("invalid config: {}", e)))?;
        let mut config = Self::defaults()?;
        config.merge(user);
        Ok(config)
    }

    fn defaults() -> Result<Self, ServiceError> {
        let base: ConfigFile = toml::from_str(DEFAULT_CONFIG)
            .map_err(|e| ServiceError::Config(format!("embedded config.toml: {}", e)))?;
        Ok(Self {
            wall: base.wall,
            control_window: base.control_window,
            service: base.service,
        })
    }

    fn merge(&mut self, user: ConfigFile) {
        merge_wall(&mut self.wall, user.wall);
        merge_control_window(&mut self.control_window, user.control_window);
        merge_service(&mut self.service, user.service);
    }

    pub fn layout(&self) -> WallLayout {
        WallLayout::new(
            vec2(self.wall.num_displays, [1, 1]),
            vec2(self.wall.window_size, [320, 240]),
            vec2(self.wall.bezel, [0, 0]),
        )
    }

    pub fn stereo(&self) -> bool {
        self.wall.stereo.unwrap_or(false)
    }

    pub fn has_control_window(&self) -> bool {
        self.control_window.enabled.unwrap_or(false)
    }

    pub fn control_window_size(&self) -> Vec2i {
        vec2(self.control_window.size, [512, 512])
    }

    pub fn info_port(&self) -> u16 {
        self.service.info_port.unwrap_or(2903)
    }

    pub fn client_port(&self) -> u16 {
        self.service.client_port.unwrap_or(0)
    }

    pub fn head_node(&self) -> bool {
        self.service.head_node.unwrap_or(false)
    }

    /// Host name given to clients, if one is configured.
    pub fn advertise_host(&self) -> Option<&str> {
        self.service
            .advertise_host
            .as_deref()
            .filter(|h| !h.trim().is_empty())
    }

    /// Credit tokens handed to clients up front (at least 1).
    pub fn max_frames_in_flight(&self) -> u32 {
        self.service.max_frames_in_flight.unwrap_or(1).max(1)
    }

    /// Assembler worker threads per display (clamped to 1..=64).
    pub fn assembler_threads(&self) -> usize {
        self.service.assembler_threads.unwrap_or(8).clamp(1, 64)
    }

    pub fn codec(&self) -> CodecKind {
        match self.service.codec.as_deref().map(str::parse::<CodecKind>) {
            Some(Ok(kind)) => kind,
            Some(Err(e)) => {
                log::warn!(target: "config", "{}, using raw", e);
                CodecKind::Raw
            }
            None => CodecKind::Raw,
        }
    }

    /// Ranks a deployment of this wall needs: one per display, plus the head node.
    pub fn rank_count(&self) -> usize {
        self.layout().display_count() + self.head_node() as usize
    }
}

fn vec2(v: Option<[i32; 2]>, fallback: [i32; 2]) -> Vec2i {
    let [x, y] = v.unwrap_or(fallback);
    Vec2i::new(x, y)
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tilewall").join("config.toml"))
}

fn merge_wall(base: &mut WallSection, user: WallSection) {
    if user.num_displays.is_some() {
        base.num_displays = user.num_displays;
    }
    if user.window_size.is_some() {
        base.window_size = user.window_size;
    }
    if user.bezel.is_some() {
        base.bezel = user.bezel;
    }
    if user.stereo.is_some() {
        base.stereo = user.stereo;
    }
}

fn merge_control_window(base: &mut ControlWindowSection, user: ControlWindowSection) {
    if user.enabled.is_some() {
        base.enabled = user.enabled;
    }
    if user.size.is_some() {
        base.size = user.size;
    }
}

fn merge_service(base: &mut ServiceSection, user: ServiceSection) {
    if user.info_port.is_some() {
        base.info_port = user.info_port;
    }
    if user.client_port.is_some() {
        base.client_port = user.client_port;
    }
    if user.head_node.is_some() {
        base.head_node = user.head_node;
    }
    if user.advertise_host.is_some() {
        base.advertise_host = user.advertise_host;
    }
    if user.max_frames_in_flight.is_some() {
        base.max_frames_in_flight = user.max_frames_in_flight;
    }
    if user.assembler_threads.is_some() {
        base.assembler_threads = user.assembler_threads;
    }
    if user.codec.is_some() {
        base.codec = user.codec;
    }
}
