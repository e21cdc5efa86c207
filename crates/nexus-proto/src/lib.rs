pub mod ctrl {
    pub mod v1 {
        tonic::include_proto!("nexus.ctrl.v1");
    }
}

mod convert;
pub use convert::MissingField;

pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("nexus_ctrl_descriptor");
