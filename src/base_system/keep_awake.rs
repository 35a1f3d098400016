//! 下载期间阻止系统休眠（仅 macOS，通过 `caffeinate` 子进程）。

use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

const CAFFEINATE_BIN: &str = "/usr/bin/caffeinate";

/// RAII guard：构造时启动 `caffeinate`，drop 时结束它。
/// 在非 macOS 平台或开关关闭时是空操作。
pub struct KeepAwake {
    child: Option<Child>,
}

impl KeepAwake {
    pub fn start(enabled: bool) -> Self {
        if !enabled || !cfg!(target_os = "macos") || !Path::new(CAFFEINATE_BIN).is_file() {
            return Self { child: None };
        }
        match Command::new(CAFFEINATE_BIN)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                debug!("caffeinate started (pid {})", child.id());
                Self { child: Some(child) }
            }
            Err(err) => {
                warn!("failed to start caffeinate: {err}");
                Self { child: None }
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill() {
                warn!("failed to terminate caffeinate (pid {}): {err}", child.id());
            }
            let _ = child.wait();
        }
    }
}

impl Drop for KeepAwake {
    fn drop(&mut self) {
        self.stop();
    }
}
