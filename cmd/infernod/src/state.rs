use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use pkg_types::vm::VmRecord;

use crate::image::ImageProvider;

#[derive(Clone)]
pub struct AppState {
    pub chroot_base: PathBuf,
    pub kernel_path: PathBuf,
    pub firecracker_path: PathBuf,
    pub kiln_path: PathBuf,
    pub init_path: PathBuf,
    pub log_dir: PathBuf,
    pub kms_socket_path: Option<PathBuf>,
    pub image_provider: Arc<dyn ImageProvider>,
    pub vms: Arc<Mutex<HashMap<String, VmRecord>>>,
}
