mod tests_neighbors;
