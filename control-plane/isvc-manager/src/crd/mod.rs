pub mod service_instance;
