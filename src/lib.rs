extern crate thiserror;

pub mod common;
pub mod dependencies;
pub mod deploy;
pub mod inspector;
pub mod library;
pub mod path_list;
pub mod qt;
pub mod query;
pub mod rpath;
pub mod search_path;
pub mod tool;
pub mod translation;

pub use common::{clean_path, path_to_string, DeployError, DeployStage};
pub use dependencies::BinaryDependencies;
pub use deploy::{deploy, DeployReport, Deployer};
pub use library::{LibraryInfo, LibraryInfoList, LibraryName, OperatingSystem};
pub use path_list::PathList;
pub use query::DeployQuery;
pub use search_path::SearchPathList;
