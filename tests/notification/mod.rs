mod notify_test;
