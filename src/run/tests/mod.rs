mod tests_builder_open;
