/*
 * Test utilities and fixture helpers for w1therm
 *
 * This module builds fake w1 sysfs trees in temporary directories so that
 * discovery, acquisition and reconciliation can be tested without hardware.
 */

#[cfg(test)]
pub mod test_utils {
    use std::ffi::CString;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    use crate::constants::sysfs;

    /// Builds `w1_slave` content as printed by the w1_therm driver
    pub fn slave_content(raw: i64, crc_ok: bool) -> String {
        let crc = if crc_ok { "YES" } else { "NO" };
        format!(
            "a4 01 4b 46 7f ff 0c 10 8c : crc=8c {}\na4 01 4b 46 7f ff 0c 10 8c t={}\n",
            crc, raw
        )
    }

    /// A devices directory laid out like /sys/bus/w1/devices
    pub struct FakeW1Tree {
        _temp_dir: TempDir,
        root: PathBuf,
    }

    impl FakeW1Tree {
        pub fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path().join("devices");
            fs::create_dir_all(&root).unwrap();
            Self { _temp_dir: temp_dir, root }
        }

        pub fn root(&self) -> &Path {
            &self.root
        }

        pub fn add_bus(&self, index: u32, bulk: bool) -> PathBuf {
            let bus = self.root.join(format!("{}{}", sysfs::BUS_MASTER_PREFIX, index));
            fs::create_dir_all(&bus).unwrap();
            if bulk {
                fs::write(bus.join(sysfs::BULK_READ_FILE), "0\n").unwrap();
            }
            bus
        }

        /// Bus whose `therm_bulk_read` is a FIFO, to be driven by a [`ConversionDriver`]
        pub fn add_fifo_bulk_bus(&self, index: u32) -> PathBuf {
            let bus = self.root.join(format!("{}{}", sysfs::BUS_MASTER_PREFIX, index));
            fs::create_dir_all(&bus).unwrap();
            let marker = CString::new(bus.join(sysfs::BULK_READ_FILE).as_os_str().as_bytes()).unwrap();
            assert_eq!(unsafe { libc::mkfifo(marker.as_ptr(), 0o600) }, 0, "mkfifo failed");
            bus
        }

        pub fn add_slave_sensor(&self, bus: &Path, id: &str, raw: i64) -> PathBuf {
            self.write_slave(bus, id, &slave_content(raw, true))
        }

        pub fn write_slave(&self, bus: &Path, id: &str, content: &str) -> PathBuf {
            let dir = bus.join(id);
            fs::create_dir_all(&dir).unwrap();
            let file = dir.join(sysfs::SLAVE_FILE);
            fs::write(&file, content).unwrap();
            file
        }

        pub fn add_bulk_sensor(&self, bus: &Path, id: &str, raw: i64) -> PathBuf {
            self.add_slave_sensor(bus, id, raw);
            self.set_bulk_value(bus, id, raw)
        }

        pub fn set_bulk_value(&self, bus: &Path, id: &str, raw: i64) -> PathBuf {
            let file = bus.join(id).join(sysfs::BULK_RESULT_FILE);
            fs::write(&file, format!("{}\n", raw)).unwrap();
            file
        }

        pub fn add_other_entry(&self, dir: &Path, name: &str) {
            fs::create_dir_all(dir.join(name)).unwrap();
        }

        pub fn bulk_status(&self, bus: &Path) -> String {
            fs::read_to_string(bus.join(sysfs::BULK_READ_FILE)).unwrap()
        }

        pub fn set_bulk_status(&self, bus: &Path, status: &str) {
            fs::write(bus.join(sysfs::BULK_READ_FILE), status).unwrap();
        }

        pub fn rename_entry(&self, dir: &Path, from: &str, to: &str) {
            fs::rename(dir.join(from), dir.join(to)).unwrap();
        }

        pub fn move_sensor(&self, from_bus: &Path, to_bus: &Path, id: &str) {
            fs::rename(from_bus.join(id), to_bus.join(id)).unwrap();
        }

        pub fn remove_root(&self) {
            fs::remove_dir_all(&self.root).unwrap();
        }
    }

    /// Plays the kernel side of a FIFO `therm_bulk_read`: consumes the trigger
    /// token, then answers every status read with `-1` until the conversion
    /// finishes, then with `1`.
    pub struct ConversionDriver {
        stop: Arc<AtomicBool>,
        handle: Option<JoinHandle<()>>,
    }

    impl ConversionDriver {
        /// Finish `delay` after the trigger, running `on_done` first
        pub fn finish_after<F>(bus: &Path, delay: Duration, on_done: F) -> Self
        where
            F: FnOnce() + Send + 'static,
        {
            Self::spawn(bus, Some((delay, Box::new(on_done) as Box<dyn FnOnce() + Send>)))
        }

        /// Never finish; status reads keep returning `-1`
        pub fn never_finish(bus: &Path) -> Self {
            Self::spawn(bus, None)
        }

        fn spawn(bus: &Path, finish: Option<(Duration, Box<dyn FnOnce() + Send>)>) -> Self {
            let marker = bus.join(sysfs::BULK_READ_FILE);
            let stop = Arc::new(AtomicBool::new(false));
            let thread_stop = stop.clone();
            let handle = thread::spawn(move || {
                // blocks until the scanner writes the token
                let token = fs::read_to_string(&marker).unwrap();
                assert_eq!(token.trim(), sysfs::BULK_TRIGGER_TOKEN);
                let triggered = Instant::now();
                let (delay, mut on_done) = match finish {
                    Some((delay, on_done)) => (Some(delay), Some(on_done)),
                    None => (None, None),
                };

                while !thread_stop.load(Ordering::SeqCst) {
                    let finished = delay.map_or(false, |d| triggered.elapsed() >= d);
                    if finished {
                        if let Some(on_done) = on_done.take() {
                            on_done();
                        }
                    }
                    let status: &[u8] = if finished { b"1\n" } else { b"-1\n" };
                    // ENXIO until a status read has the FIFO open
                    if let Ok(mut f) = OpenOptions::new()
                        .write(true)
                        .custom_flags(libc::O_NONBLOCK)
                        .open(&marker)
                    {
                        f.write_all(status).unwrap();
                        if finished {
                            return;
                        }
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            });
            Self { stop, handle: Some(handle) }
        }
    }

    impl Drop for ConversionDriver {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }

    /// Asserts that two floating point numbers are approximately equal
    pub fn assert_approx_eq(a: f64, b: f64, tolerance: f64) {
        assert!(
            (a - b).abs() < tolerance,
            "Values {} and {} are not approximately equal (tolerance: {})",
            a, b, tolerance
        );
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use std::fs;

    #[test]
    fn test_slave_content_format() {
        let ok = slave_content(26312, true);
        assert!(ok.lines().next().unwrap().ends_with("YES"));
        assert!(ok.lines().nth(1).unwrap().ends_with("t=26312"));
        assert!(slave_content(1, false).contains("crc=8c NO"));
    }

    #[test]
    fn test_fake_tree_layout() {
        let tree = FakeW1Tree::new();
        let bus = tree.add_bus(1, true);
        let file = tree.add_bulk_sensor(&bus, "28-1", 1000);
        assert!(file.ends_with("w1_bus_master1/28-1/temperature"));
        assert_eq!(fs::read_to_string(file).unwrap(), "1000\n");
        assert_eq!(tree.bulk_status(&bus), "0\n");
    }

    #[test]
    #[should_panic]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq(1.0, 1.1, 0.01);
    }
}
