pub mod eager_resource_manager;
pub mod node;
pub mod resource_manager_trait;
mod rm_message;
