// 该文件是 Daoyin （导引） 项目的一部分。
// src/timer.rs - 可取消、周期可实时修改的重复任务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc::{self, RecvTimeoutError, Sender},
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use tracing::{debug, error, info};

/// 周期下限，避免忙等
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct TaskControl {
  period_ms: AtomicU64,
  enabled: AtomicBool,
}

/// 重复任务的控制句柄，可在任务运行中修改周期与使能状态
#[derive(Debug, Clone)]
pub struct TaskHandle {
  control: Arc<TaskControl>,
}

impl TaskHandle {
  fn new(period: Duration) -> Self {
    Self {
      control: Arc::new(TaskControl {
        period_ms: AtomicU64::new(period.as_millis() as u64),
        enabled: AtomicBool::new(true),
      }),
    }
  }

  /// 修改周期，下一次休眠生效
  pub fn set_period(&self, period: Duration) {
    self
      .control
      .period_ms
      .store(period.as_millis() as u64, Ordering::Release);
  }

  /// 当前周期，不小于 [`MIN_PERIOD`]
  pub fn period(&self) -> Duration {
    Duration::from_millis(self.control.period_ms.load(Ordering::Acquire)).max(MIN_PERIOD)
  }

  /// 暂停或恢复动作执行；暂停时循环仍按周期空转
  pub fn set_enabled(&self, enabled: bool) {
    self.control.enabled.store(enabled, Ordering::Release);
  }

  pub fn is_enabled(&self) -> bool {
    self.control.enabled.load(Ordering::Acquire)
  }
}

struct Worker {
  cancel: Sender<()>,
  thread: JoinHandle<()>,
}

/// 重复任务
///
/// 循环体为“执行动作，然后按当前周期休眠”。周期在每次休眠前重新读取，
/// 休眠可被 [`RepeatingTask::stop`] 立即打断。同一实例同时最多只有一个循环。
pub struct RepeatingTask {
  name: String,
  handle: TaskHandle,
  worker: Option<Worker>,
}

impl RepeatingTask {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      handle: TaskHandle::new(Duration::from_millis(1000)),
      worker: None,
    }
  }

  pub fn handle(&self) -> TaskHandle {
    self.handle.clone()
  }

  pub fn is_running(&self) -> bool {
    self
      .worker
      .as_ref()
      .map(|w| !w.thread.is_finished())
      .unwrap_or(false)
  }

  /// 启动循环；若已在运行，先停止旧循环
  pub fn start<F>(&mut self, initial_period: Duration, mut action: F) -> std::io::Result<()>
  where
    F: FnMut() + Send + 'static,
  {
    self.stop();
    self.handle.set_period(initial_period);

    let (cancel, cancelled) = mpsc::channel::<()>();
    let handle = self.handle.clone();
    let name = self.name.clone();

    let thread = thread::Builder::new()
      .name(self.name.clone())
      .spawn(move || {
        let mut ticks = 0u64;
        loop {
          if handle.is_enabled() {
            action();
          }
          ticks += 1;

          match cancelled.recv_timeout(handle.period()) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
          }
        }
        debug!("任务 {} 退出，共 {} 次", name, ticks);
      })?;

    info!("任务 {} 已启动，初始周期 {:?}", self.name, initial_period);
    self.worker = Some(Worker { cancel, thread });
    Ok(())
  }

  /// 停止循环并等待线程退出，可重复调用
  pub fn stop(&mut self) {
    if let Some(worker) = self.worker.take() {
      let _ = worker.cancel.send(());
      if worker.thread.join().is_err() {
        error!("任务 {} 线程异常退出", self.name);
      } else {
        info!("任务 {} 已停止", self.name);
      }
    }
  }
}

impl Drop for RepeatingTask {
  fn drop(&mut self) {
    self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{sync::mpsc::Receiver, time::Instant};

  fn ticker(task: &mut RepeatingTask, period: Duration) -> Receiver<Instant> {
    let (tx, rx) = mpsc::channel();
    task
      .start(period, move || {
        let _ = tx.send(Instant::now());
      })
      .unwrap();
    rx
  }

  #[test]
  fn period_change_applies_to_next_sleep() {
    let mut task = RepeatingTask::new("live-period");
    let handle = task.handle();
    let (tx, rx) = mpsc::channel();
    let mut first = true;

    task
      .start(Duration::from_millis(1000), move || {
        if first {
          // 第一次执行后立刻修改周期
          handle.set_period(Duration::from_millis(10));
          first = false;
        }
        let _ = tx.send(Instant::now());
      })
      .unwrap();

    let t1 = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let t2 = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let t3 = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    task.stop();

    assert!(t2 - t1 < Duration::from_millis(500), "{:?}", t2 - t1);
    assert!(t3 - t2 < Duration::from_millis(500), "{:?}", t3 - t2);
  }

  #[test]
  fn stop_cancels_a_long_sleep() {
    let mut task = RepeatingTask::new("long-sleep");
    let rx = ticker(&mut task, Duration::from_secs(60));
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    let now = Instant::now();
    task.stop();
    assert!(now.elapsed() < Duration::from_secs(5));
    assert!(!task.is_running());
    assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
  }

  #[test]
  fn restart_replaces_running_loop() {
    let mut task = RepeatingTask::new("restart");
    let old = ticker(&mut task, Duration::from_millis(5));
    old.recv_timeout(Duration::from_secs(2)).unwrap();

    let new = ticker(&mut task, Duration::from_millis(5));
    new.recv_timeout(Duration::from_secs(2)).unwrap();

    // 旧循环已停止，其发送端随线程一起释放
    while old.try_recv().is_ok() {}
    assert!(matches!(
      old.recv_timeout(Duration::from_millis(50)),
      Err(RecvTimeoutError::Disconnected)
    ));
    task.stop();
  }

  #[test]
  fn disabled_task_keeps_ticking_without_action() {
    let mut task = RepeatingTask::new("gate");
    let handle = task.handle();
    let rx = ticker(&mut task, Duration::from_millis(5));
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    handle.set_enabled(false);
    thread::sleep(Duration::from_millis(20));
    while rx.try_recv().is_ok() {}
    assert!(rx.recv_timeout(Duration::from_millis(60)).is_err());
    assert!(task.is_running());

    handle.set_enabled(true);
    assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    task.stop();
  }

  #[test]
  fn period_is_floored() {
    let task = RepeatingTask::new("floor");
    let handle = task.handle();
    handle.set_period(Duration::ZERO);
    assert_eq!(handle.period(), MIN_PERIOD);
  }
}
