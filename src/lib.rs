//! Planning core of an image patcher: find the source image, pick the
//! package ecosystem, and reconcile staged artifacts with fix requests.

pub mod config;
pub mod connhelper;
pub mod helpers;
pub mod image;
pub mod pkgmgr;
