mod conflict_wakeup_test;
mod take_race_test;
