//! Linux USB HID gadget transport
//!
//! Each logical device is one function of the composite gadget and shows up
//! as its own character device (`/dev/hidg0`, `/dev/hidg1`). Writes are
//! non-blocking: if the previous report has not been collected by the host
//! yet the kernel answers `EAGAIN`, which is reported as [`TransportError::Busy`]
//! and retried by the differ on the next tick.

use crate::input::lines::DEVICE_COUNT;
use crate::input::DeviceId;
use crate::report::{Report, ReportTransport, TransportError};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug)]
struct Endpoint {
    path: PathBuf,
    report_id: u8,
    file: Option<File>,
}

impl Endpoint {
    fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    // Opened lazily: the node only accepts writes once the host has bound the gadget
    fn file(&mut self) -> Result<&mut File, TransportError> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.path)
                .map_err(|e| TransportError::NotReady(self.display_path(), e.to_string()))?;
            info!("Opened HID endpoint {}", self.path.display());
            self.file = Some(file);
        }

        let path = self.display_path();
        self.file
            .as_mut()
            .ok_or_else(|| TransportError::NotReady(path, "not open".to_string()))
    }
}

/// Writes reports to the gadget's `hidgN` nodes, one node per device
#[derive(Debug)]
pub struct HidGadgetTransport {
    endpoints: [Endpoint; DEVICE_COUNT],
}

impl HidGadgetTransport {
    /// `paths` and `report_ids` are ordered by [`DeviceId::index`]
    pub fn new(paths: [&Path; DEVICE_COUNT], report_ids: [u8; DEVICE_COUNT]) -> Self {
        let endpoint = |index: usize| Endpoint {
            path: paths[index].to_path_buf(),
            report_id: report_ids[index],
            file: None,
        };

        Self {
            endpoints: [endpoint(0), endpoint(1)],
        }
    }

    pub fn path(&self, device: DeviceId) -> &Path {
        &self.endpoints[device.index()].path
    }
}

impl ReportTransport for HidGadgetTransport {
    fn send_report(&mut self, device: DeviceId, report: &Report) -> Result<(), TransportError> {
        let endpoint = &mut self.endpoints[device.index()];
        let bytes = report.to_wire(endpoint.report_id);

        let result = endpoint.file()?.write(&bytes);
        match result {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(written) => Err(TransportError::ShortWrite {
                path: endpoint.display_path(),
                written,
                expected: bytes.len(),
            }),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TransportError::Busy),
            Err(e) => {
                // host went away (ESHUTDOWN) or the node was removed; reopen next time
                endpoint.file = None;
                Err(TransportError::Io {
                    path: endpoint.display_path(),
                    source: e,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Direction;
    use crate::report::BUTTON_FIRE;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dualjoy-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn writes_id_prefixed_report_to_device_node() {
        let dir = scratch_dir("hidg-write");
        let one = dir.join("hidg0");
        let two = dir.join("hidg1");
        fs::write(&one, b"").unwrap();
        fs::write(&two, b"").unwrap();

        let mut transport = HidGadgetTransport::new([one.as_path(), two.as_path()], [4, 5]);
        transport
            .send_report(DeviceId::Two, &Report::new(Direction::NorthEast, 0))
            .unwrap();
        transport
            .send_report(DeviceId::One, &Report::new(Direction::West, BUTTON_FIRE))
            .unwrap();

        assert_eq!(fs::read(&one).unwrap(), vec![4, 7, 1]);
        assert_eq!(fs::read(&two).unwrap(), vec![5, 2, 0]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_node_is_not_ready_and_recovers() {
        let dir = scratch_dir("hidg-missing");
        let one = dir.join("hidg0");
        let two = dir.join("hidg1");

        let mut transport = HidGadgetTransport::new([one.as_path(), two.as_path()], [0, 0]);
        let err = transport
            .send_report(DeviceId::One, &Report::default())
            .unwrap_err();
        assert!(matches!(err, TransportError::NotReady(..)));

        // node appears once the gadget is bound
        fs::write(&one, b"").unwrap();
        transport
            .send_report(DeviceId::One, &Report::default())
            .unwrap();
        assert_eq!(fs::read(&one).unwrap(), vec![0, 0]);
        assert_eq!(transport.path(DeviceId::Two), two.as_path());

        fs::remove_dir_all(&dir).unwrap();
    }
}
