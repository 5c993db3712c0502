//! 跨进程记忆锁
//!
//! 基于锁文件的建议锁：每 50ms 轮询一次，尝试以 create_new 独占创建锁文件；
//! 超时后视为陈旧锁，强制删除并继续（fail-open）。两个进程可能同时接管同一把陈旧锁，
//! 这是已接受的弱点，仅适用于单机上相互配合的 Agent 进程。

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// 轮询间隔
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// 持有期间锁文件存在；release 或 Drop 时删除
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    /// 是否经过超时强制接管获得
    taken_over: bool,
    released: bool,
}

impl FileLock {
    /// 获取锁。不会失败：超时后强制清理陈旧锁文件并继续
    pub fn acquire(path: impl AsRef<Path>, timeout: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let start = Instant::now();
        loop {
            match try_create(&path) {
                Ok(()) => {
                    return Self {
                        path,
                        taken_over: false,
                        released: false,
                    }
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    // 目录不可写等情况：无法真正加锁，按 fail-open 继续
                    tracing::warn!(path = %path.display(), error = %e, "lock file create failed, proceeding unlocked");
                    return Self {
                        path,
                        taken_over: true,
                        released: false,
                    };
                }
            }
            if start.elapsed() >= timeout {
                tracing::warn!(
                    path = %path.display(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "lock timeout, removing stale lock"
                );
                let _ = std::fs::remove_file(&path);
                let _ = std::fs::write(&path, lock_owner());
                return Self {
                    path,
                    taken_over: true,
                    released: false,
                };
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 是否通过强制接管（而非正常等待）获得
    pub fn was_taken_over(&self) -> bool {
        self.taken_over
    }

    /// 释放锁：删除锁文件（文件已不存在时忽略）
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.remove();
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    f.write_all(lock_owner().as_bytes())
}

/// 锁文件内容：持有者进程号，便于人工排查陈旧锁
fn lock_owner() -> String {
    format!("pid={}\n", std::process::id())
}
