pub mod cluster_dto;
