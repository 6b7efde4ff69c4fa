mod registration_recovery_test;
