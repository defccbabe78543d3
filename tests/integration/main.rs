mod keyring_test;
mod storage_test;
mod test_utils;
mod write_race_test;
