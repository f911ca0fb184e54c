pub mod task_janitor;
