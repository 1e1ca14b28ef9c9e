mod tests_flush_compact;
