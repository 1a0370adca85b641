//! 外部工具路径解析（ffmpeg / ffprobe / exiftool）
//!
//! Order: environment override, next to the executable (or its `bin/`),
//! then the bare name for a `PATH` lookup.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const FFMPEG_ENV: &str = "PANO_FFMPEG_PATH";
pub const FFPROBE_ENV: &str = "PANO_FFPROBE_PATH";
pub const EXIFTOOL_ENV: &str = "PANO_EXIFTOOL_PATH";

fn exe_dir() -> Option<PathBuf> {
    env::current_exe().ok()?.parent().map(|d| d.to_path_buf())
}

fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        for candidate in [dir.join(&filename), dir.join("bin").join(&filename)] {
            if candidate.exists() {
                return candidate;
            }
        }
    }

    PathBuf::from(default_name)
}

pub fn ffmpeg_path() -> PathBuf {
    resolve_tool(FFMPEG_ENV, "ffmpeg")
}

pub fn ffprobe_path() -> PathBuf {
    resolve_tool(FFPROBE_ENV, "ffprobe")
}

pub fn exiftool_path() -> PathBuf {
    resolve_tool(EXIFTOOL_ENV, "exiftool")
}

/// 工具是否可执行（PATH 回退时实际运行一次）
pub fn is_available(path: &Path, version_flag: &str) -> bool {
    if path.is_file() {
        return true;
    }
    Command::new(path)
        .arg(version_flag)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_to_bare_name() {
        let path = resolve_tool("PANO_TEST_TOOL_UNSET", "pano-test-cmd");
        assert_eq!(path, PathBuf::from("pano-test-cmd"));
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake-ffmpeg");
        std::fs::write(&fake, "x").unwrap();

        env::set_var("PANO_TEST_TOOL_SET", &fake);
        assert_eq!(resolve_tool("PANO_TEST_TOOL_SET", "ffmpeg"), fake);
        assert!(is_available(&fake, "-version"));

        // 指向不存在的文件时忽略覆盖
        env::set_var("PANO_TEST_TOOL_SET", dir.path().join("missing"));
        assert_eq!(resolve_tool("PANO_TEST_TOOL_SET", "ffmpeg"), PathBuf::from("ffmpeg"));
        env::remove_var("PANO_TEST_TOOL_SET");
    }
}
