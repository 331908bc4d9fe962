pub mod package_manager;
