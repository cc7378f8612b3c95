mod delete_test;
mod pipeline_test;
mod toast_test;
